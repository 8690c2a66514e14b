#![forbid(unsafe_code)]

pub use wsdsig_core as core;
pub use wsdsig_xml as xml;
pub use wsdsig_c14n as c14n;
pub use wsdsig_crypto as crypto;
pub use wsdsig_transforms as transforms;
pub use wsdsig_dsig as dsig;
