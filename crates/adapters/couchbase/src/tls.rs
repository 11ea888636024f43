//! Root certificate handling for `couchbases://` connections

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cbdb_errors::{AppError, AppResult};
use reqwest::Certificate;

/// Certificates trusted when verifying the cluster.
#[derive(Debug, Clone)]
pub struct TrustPool {
    certificates: Vec<Certificate>,
}

impl TrustPool {
    /// Parses every certificate in a PEM bundle. A bundle that yields no
    /// certificate at all is rejected.
    pub fn from_pem(pem: &[u8]) -> AppResult<Self> {
        let certificates = Certificate::from_pem_bundle(pem).map_err(|e| {
            AppError::invalid_tls_with_source("failed to parse root certificate", e)
        })?;

        if certificates.is_empty() {
            return Err(AppError::invalid_tls("failed to parse root certificate"));
        }

        Ok(Self { certificates })
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}

/// TLS settings handed to the transport.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub trust_pool: TrustPool,
    /// Skip hostname and chain verification. Test clusters only.
    pub skip_verify: bool,
}

/// Decodes `base64pem` and builds the trust pool from it.
///
/// Whitespace anywhere in the input is ignored, so line-wrapped output of
/// `base64 ca.pem` is accepted as is.
pub fn build_security_config(base64pem: &str, skip_verify: bool) -> AppResult<SecurityConfig> {
    let compact: String = base64pem.split_ascii_whitespace().collect();
    let pem = STANDARD
        .decode(compact)
        .map_err(|e| AppError::invalid_tls_with_source("error decoding base64pem", e))?;

    Ok(SecurityConfig {
        trust_pool: TrustPool::from_pem(&pem)?,
        skip_verify,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ca_pem() -> String {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        certified.cert.pem()
    }

    #[test]
    fn test_build_from_valid_bundle() {
        let bundle = format!("{}{}", ca_pem(), ca_pem());
        let encoded = STANDARD.encode(bundle);

        let security = build_security_config(&encoded, true).unwrap();
        assert_eq!(security.trust_pool.len(), 2);
        assert!(security.skip_verify);
    }

    #[test]
    fn test_surrounding_whitespace_is_tolerated() {
        let encoded = format!("  {}\n", STANDARD.encode(ca_pem()));
        let security = build_security_config(&encoded, false).unwrap();
        assert_eq!(security.trust_pool.len(), 1);
        assert!(!security.skip_verify);
    }

    #[test]
    fn test_line_wrapped_base64_is_accepted() {
        let encoded = STANDARD.encode(ca_pem());
        let wrapped = encoded
            .as_bytes()
            .chunks(76)
            .map(|line| std::str::from_utf8(line).unwrap())
            .collect::<Vec<_>>()
            .join("\r\n");
        assert!(wrapped.contains('\n'));

        let security = build_security_config(&wrapped, false).unwrap();
        assert_eq!(security.trust_pool.len(), 1);
    }

    #[test]
    fn test_invalid_base64() {
        let err = build_security_config("not base64 at all!", false).unwrap_err();
        assert!(matches!(err, AppError::InvalidTls { .. }));
        assert!(err.to_string().contains("error decoding base64pem"));
    }

    #[test]
    fn test_no_certificates_in_bundle() {
        let encoded = STANDARD.encode("just some text, no PEM blocks");
        let err = build_security_config(&encoded, false).unwrap_err();
        assert!(matches!(err, AppError::InvalidTls { .. }));
        assert!(err.to_string().contains("failed to parse root certificate"));
    }
}
