/// Calculate the MD5 digest of one or more byte slices concatenated.
#[macro_export]
macro_rules! md5 {
    ( $( $x:expr ),+ ) => {{
        use md5::{Digest, Md5};
        let mut h = Md5::new();
        $( h.update($x); )+
        let out: [u8; 16] = h.finalize().into();
        out
    }};
}

/// Calculate the SHA-256 digest of one or more byte slices concatenated.
#[macro_export]
macro_rules! sha256 {
    ( $( $x:expr ),+ ) => {{
        use sha2::{Digest, Sha256};
        let mut h = Sha256::new();
        $( h.update($x); )+
        let out: [u8; 32] = h.finalize().into();
        out
    }};
}
