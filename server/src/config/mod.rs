use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 15;
const DEFAULT_ENABLED_GATEWAYS: &str = "qpay,cybersource";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// What to record when a QPay ticket is inquired before the buyer ever came
/// back from the payment page with a PUN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingRefPolicy {
    /// Historical behaviour.
    MarkPaid,
    MarkFailed,
}

/// How add-on ids unknown to the catalog entry are treated when pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOnPolicy {
    Skip,
    Reject,
}

#[derive(Clone)]
pub struct QPayConfig {
    pub merchant_id: String,
    pub bank_id: String,
    pub secret_key: String,
    /// Browser redirect target for the payment page.
    pub redirect_url: String,
    /// Server-to-server endpoint for inquiry and refund.
    pub api_url: String,
    pub return_url: Option<String>,
    pub currency_code: String,
    pub lang: String,
}

impl fmt::Debug for QPayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QPayConfig")
            .field("merchant_id", &self.merchant_id)
            .field("bank_id", &self.bank_id)
            .field("secret_key", &"<redacted>")
            .field("redirect_url", &self.redirect_url)
            .field("api_url", &self.api_url)
            .field("currency_code", &self.currency_code)
            .finish()
    }
}

#[derive(Clone)]
pub struct CyberSourceConfig {
    pub merchant_id: String,
    pub api_key_id: String,
    /// Base64 shared secret.
    pub api_secret: String,
    /// API host derived from the run environment.
    pub host: String,
    pub currency: String,
    pub target_origin: Option<String>,
}

impl fmt::Debug for CyberSourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CyberSourceConfig")
            .field("merchant_id", &self.merchant_id)
            .field("api_key_id", &self.api_key_id)
            .field("api_secret", &"<redacted>")
            .field("host", &self.host)
            .field("currency", &self.currency)
            .finish()
    }
}

/// Operator mail for refund requests, sent through SES.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorMailConfig {
    pub operator_email: String,
    pub from_email: String,
    pub ses_region: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub is_production: bool,
    pub cors_allowed_origins: Option<String>,
    pub gateway_timeout: Duration,
    pub qpay: Option<QPayConfig>,
    pub cybersource: Option<CyberSourceConfig>,
    pub missing_ref_policy: MissingRefPolicy,
    pub add_on_policy: AddOnPolicy,
    pub operator_mail: Option<OperatorMailConfig>,
}

fn opt(vars: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    vars(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(
    vars: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<String, ConfigError> {
    opt(vars, key).ok_or(ConfigError::Missing(key))
}

fn parse_or<T>(
    vars: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match opt(vars, key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name: key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn cybersource_host(run_environment: &str) -> String {
    match run_environment.to_ascii_lowercase().as_str() {
        "sandbox" | "test" | "apitest" => "apitest.cybersource.com".to_string(),
        "production" | "live" | "api" => "api.cybersource.com".to_string(),
        other => other
            .trim_start_matches("https://")
            .trim_end_matches('/')
            .to_string(),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&|key: &str| env::var(key).ok())
    }

    /// Every enabled gateway must be fully configured; nothing is deferred to first use.
    pub fn from_vars(vars: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = required(vars, "DATABASE_URL")?;
        let host = opt(vars, "APP_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_or(vars, "APP_PORT", 3001u16)?;
        let is_production = opt(vars, "RUST_ENV")
            .map(|v| v.to_lowercase() == "production")
            .unwrap_or(false);

        let timeout_secs = parse_or(vars, "GATEWAY_TIMEOUT_SECS", DEFAULT_GATEWAY_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "GATEWAY_TIMEOUT_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }

        let enabled = opt(vars, "PAYMENT_GATEWAYS")
            .unwrap_or_else(|| DEFAULT_ENABLED_GATEWAYS.to_string())
            .to_ascii_lowercase();
        let enabled: Vec<&str> = enabled
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if let Some(unknown) = enabled
            .iter()
            .find(|g| !matches!(**g, "qpay" | "cybersource"))
        {
            return Err(ConfigError::Invalid {
                name: "PAYMENT_GATEWAYS",
                reason: format!("unknown gateway '{unknown}'"),
            });
        }

        let qpay = if enabled.contains(&"qpay") {
            let redirect_url = required(vars, "QPAY_REDIRECT_URL")?;
            Some(QPayConfig {
                merchant_id: required(vars, "QPAY_MERCHANT_ID")?,
                bank_id: required(vars, "QPAY_BANK_ID")?,
                secret_key: required(vars, "QPAY_SECRET_KEY")?,
                api_url: opt(vars, "QPAY_API_URL").unwrap_or_else(|| redirect_url.clone()),
                redirect_url,
                return_url: opt(vars, "QPAY_RETURN_URL"),
                currency_code: opt(vars, "QPAY_CURRENCY_CODE").unwrap_or_else(|| "634".to_string()),
                lang: opt(vars, "QPAY_LANG").unwrap_or_else(|| "En".to_string()),
            })
        } else {
            None
        };

        let cybersource = if enabled.contains(&"cybersource") {
            Some(CyberSourceConfig {
                merchant_id: required(vars, "CYBERSOURCE_MERCHANT_ID")?,
                api_key_id: required(vars, "CYBERSOURCE_API_KEY_ID")?,
                api_secret: required(vars, "CYBERSOURCE_API_SECRET")?,
                host: cybersource_host(&required(vars, "CYBERSOURCE_RUN_ENVIRONMENT")?),
                currency: opt(vars, "CYBERSOURCE_CURRENCY").unwrap_or_else(|| "QAR".to_string()),
                target_origin: opt(vars, "CYBERSOURCE_TARGET_ORIGIN"),
            })
        } else {
            None
        };

        let missing_ref_policy = match opt(vars, "QPAY_MISSING_REF_POLICY").as_deref() {
            None | Some("paid") => MissingRefPolicy::MarkPaid,
            Some("failed") => MissingRefPolicy::MarkFailed,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "QPAY_MISSING_REF_POLICY",
                    reason: format!("expected 'paid' or 'failed', got '{other}'"),
                })
            }
        };

        let add_on_policy = match opt(vars, "UNKNOWN_ADD_ON_POLICY").as_deref() {
            None | Some("skip") => AddOnPolicy::Skip,
            Some("reject") => AddOnPolicy::Reject,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "UNKNOWN_ADD_ON_POLICY",
                    reason: format!("expected 'skip' or 'reject', got '{other}'"),
                })
            }
        };

        let operator_mail = match opt(vars, "REFUND_OPERATOR_EMAIL") {
            Some(operator_email) => Some(OperatorMailConfig {
                operator_email,
                from_email: required(vars, "SES_FROM_EMAIL")?,
                ses_region: opt(vars, "SES_REGION"),
            }),
            None => None,
        };

        Ok(Self {
            database_url,
            host,
            port,
            is_production,
            cors_allowed_origins: opt(vars, "CORS_ALLOWED_ORIGINS"),
            gateway_timeout: Duration::from_secs(timeout_secs),
            qpay,
            cybersource,
            missing_ref_policy,
            add_on_policy,
            operator_mail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const QPAY: [(&str, &str); 4] = [
        ("QPAY_MERCHANT_ID", "M1"),
        ("QPAY_BANK_ID", "QPAY"),
        ("QPAY_SECRET_KEY", "secret"),
        ("QPAY_REDIRECT_URL", "https://qpay.example/pay"),
    ];

    #[test]
    fn test_database_url_is_required() {
        let err = Config::from_vars(&vars(&[("PAYMENT_GATEWAYS", "qpay")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn test_enabled_gateway_must_be_complete() {
        let err = Config::from_vars(&vars(&[
            ("DATABASE_URL", "postgres://localhost/tours"),
            ("PAYMENT_GATEWAYS", "qpay"),
            ("QPAY_MERCHANT_ID", "M1"),
            ("QPAY_REDIRECT_URL", "https://qpay.example/pay"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("QPAY_BANK_ID")));
    }

    #[test]
    fn test_qpay_only_defaults() {
        let mut pairs = vec![
            ("DATABASE_URL", "postgres://localhost/tours"),
            ("PAYMENT_GATEWAYS", "qpay"),
        ];
        pairs.extend_from_slice(&QPAY);
        let config = Config::from_vars(&vars(&pairs)).unwrap();

        let qpay = config.qpay.unwrap();
        assert_eq!(qpay.api_url, "https://qpay.example/pay");
        assert_eq!(qpay.currency_code, "634");
        assert!(config.cybersource.is_none());
        assert_eq!(config.gateway_timeout, Duration::from_secs(15));
        assert_eq!(config.missing_ref_policy, MissingRefPolicy::MarkPaid);
        assert_eq!(config.add_on_policy, AddOnPolicy::Skip);
        assert!(config.operator_mail.is_none());
    }

    #[test]
    fn test_operator_mail_needs_sender() {
        let mut pairs = vec![
            ("DATABASE_URL", "postgres://localhost/tours"),
            ("PAYMENT_GATEWAYS", "qpay"),
            ("REFUND_OPERATOR_EMAIL", "ops@tours.example"),
        ];
        pairs.extend_from_slice(&QPAY);
        let err = Config::from_vars(&vars(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("SES_FROM_EMAIL")));

        pairs.push(("SES_FROM_EMAIL", "noreply@tours.example"));
        let config = Config::from_vars(&vars(&pairs)).unwrap();
        assert_eq!(
            config.operator_mail,
            Some(OperatorMailConfig {
                operator_email: "ops@tours.example".to_string(),
                from_email: "noreply@tours.example".to_string(),
                ses_region: None,
            })
        );
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let mut pairs = vec![
            ("DATABASE_URL", "postgres://localhost/tours"),
            ("PAYMENT_GATEWAYS", "qpay"),
            ("QPAY_MISSING_REF_POLICY", "maybe"),
        ];
        pairs.extend_from_slice(&QPAY);
        let err = Config::from_vars(&vars(&pairs)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "QPAY_MISSING_REF_POLICY",
                ..
            }
        ));
    }

    #[test]
    fn test_cybersource_run_environment_aliases() {
        assert_eq!(cybersource_host("sandbox"), "apitest.cybersource.com");
        assert_eq!(cybersource_host("production"), "api.cybersource.com");
        assert_eq!(
            cybersource_host("https://apitest.cybersource.com/"),
            "apitest.cybersource.com"
        );
    }

    #[test]
    fn test_secrets_are_redacted_in_debug() {
        let mut pairs = vec![
            ("DATABASE_URL", "postgres://localhost/tours"),
            ("PAYMENT_GATEWAYS", "qpay"),
        ];
        pairs.extend_from_slice(&QPAY);
        let config = Config::from_vars(&vars(&pairs)).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("\"secret\""));
        assert!(rendered.contains("<redacted>"));
    }
}
