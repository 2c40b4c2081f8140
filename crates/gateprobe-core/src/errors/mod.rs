pub mod diagnostic;

pub use diagnostic::{codes, Diagnostic};

/// Recover a structured [`Diagnostic`] from an `anyhow` error chain, if one
/// was attached anywhere along the way. Hosts call this at the boundary to
/// decide between a coded dialog and a generic failure toast.
pub fn try_map_error(err: &anyhow::Error) -> Option<Diagnostic> {
    err.downcast_ref::<Diagnostic>().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_survives_anyhow_roundtrip() {
        let err = anyhow::Error::new(Diagnostic::new(codes::E_ENV_UNAVAILABLE, "no webview"));
        let d = try_map_error(&err).unwrap();
        assert_eq!(d.code, codes::E_ENV_UNAVAILABLE);
    }

    #[test]
    fn plain_errors_map_to_none() {
        let err = anyhow::anyhow!("plain failure");
        assert!(try_map_error(&err).is_none());
    }
}
