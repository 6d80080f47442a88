use anyhow::Context;

/// Server configuration, read once at startup from the environment
/// (`.env` honored via dotenv).
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub jwt_secret: String,
    /// INSECURE compatibility mode: accept tokens without checking signature
    /// or expiry. Exists only for interop with the legacy unsigned handshake;
    /// leave off in production.
    pub allow_unverified_tokens: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_url = dotenv::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let bind_addr = dotenv::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
        let allow_unverified_tokens = dotenv::var("ALLOW_UNVERIFIED_TOKENS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let jwt_secret = match dotenv::var("JWT_SECRET") {
            Ok(secret) => secret,
            Err(_) if allow_unverified_tokens => String::new(),
            Err(_) => anyhow::bail!("JWT_SECRET is not set"),
        };

        Ok(Self {
            database_url,
            bind_addr,
            jwt_secret,
            allow_unverified_tokens,
        })
    }
}
