pub mod identity;

pub use identity::{
    decode, decode_any, decode_scrap, encode, encode_code, encode_scrap, Corner, DecodedCode,
    IdentityCode,
};
