//! Shared helpers for the gateway core: secret lookup, payload encoding and
//! request path templates.

pub mod encoding;
pub mod path_template;
pub mod secrets;

pub use encoding::{EncodingError, decode_base64, decode_base64_text, encode_base64};
pub use path_template::{fill_path_template, placeholders};
pub use secrets::{EnvSecretProvider, MapSecretProvider, SECRET_PREFIX, SecretError, SecretProvider, lookup_secret, secret_name};
