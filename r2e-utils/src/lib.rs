pub mod json_decode;
pub mod topic_filter;

pub use json_decode::{decode_leaves, decode_leaves_from_bytes, DecodedLeaf};
pub use topic_filter::matches as topic_matches;

pub mod prelude {
    pub use crate::{decode_leaves, decode_leaves_from_bytes, topic_matches, DecodedLeaf};
}
