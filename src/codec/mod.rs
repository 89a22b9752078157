// src/codec/mod.rs
//! URL <-> override tree path translation
//!
//! - **PathCodec**: network URL to raw (on-disk) and encoded (project) paths
//! - **uri**: escaping, lenient unescaping and the long-path hash

pub mod path_codec;
pub mod uri;

pub use path_codec::{
    decode_local_path, local_path_to_url_path, raw_path_to_encoded_path, FileNamePolicy,
    PathCodec, DIRECTORY_INDEX, LONG_URLS_DIR,
};
