use anyhow::{anyhow, Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub engine: EngineConfig,
    pub referral: ReferralConfig,
    pub funding: FundingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Hard ceiling on a single vendor dispatch call, in seconds.
    pub vendor_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    /// Minimum age before a pending purchase is considered stalled.
    pub sweep_cutoff_secs: u64,
    pub sweep_batch_size: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferralConfig {
    pub first_purchase_bonus: Decimal,
    pub base_rate: Decimal,
    pub boosted_rate: Decimal,
    pub boost_threshold: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FundingConfig {
    pub webhook_secret: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let server = ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .context("PORT not set")?
                .parse()
                .context("PORT must be a valid number")?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        };

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").context("DATABASE_URL not set")?,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
        };

        let redis = RedisConfig {
            url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
        };

        let engine = EngineConfig {
            vendor_timeout_secs: env::var("VENDOR_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("VENDOR_TIMEOUT_SECS must be a valid number")?,
            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .context("SWEEP_INTERVAL_SECS must be a valid number")?,
            sweep_cutoff_secs: env::var("SWEEP_CUTOFF_SECS")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .context("SWEEP_CUTOFF_SECS must be a valid number")?,
            sweep_batch_size: env::var("SWEEP_BATCH_SIZE")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .context("SWEEP_BATCH_SIZE must be a valid number")?,
        };

        let referral = ReferralConfig {
            first_purchase_bonus: env::var("REFERRAL_FIRST_PURCHASE_BONUS")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .context("REFERRAL_FIRST_PURCHASE_BONUS must be a decimal number")?,
            base_rate: env::var("REFERRAL_BASE_RATE")
                .unwrap_or_else(|_| "0.02".to_string())
                .parse()
                .context("REFERRAL_BASE_RATE must be a decimal number")?,
            boosted_rate: env::var("REFERRAL_BOOSTED_RATE")
                .unwrap_or_else(|_| "0.05".to_string())
                .parse()
                .context("REFERRAL_BOOSTED_RATE must be a decimal number")?,
            boost_threshold: env::var("REFERRAL_BOOST_THRESHOLD")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .context("REFERRAL_BOOST_THRESHOLD must be a decimal number")?,
        };

        let funding = FundingConfig {
            webhook_secret: env::var("FUNDING_WEBHOOK_SECRET")
                .context("FUNDING_WEBHOOK_SECRET not set")?,
        };

        let config = Config {
            server,
            database,
            redis,
            engine,
            referral,
            funding,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port < 1024 {
            return Err(anyhow!(
                "Port must be at least 1024, got {}",
                self.server.port
            ));
        }

        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.server.environment
            ));
        }

        if self.database.url.trim().is_empty() {
            return Err(anyhow!("DATABASE_URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }

        if self.redis.url.trim().is_empty() {
            return Err(anyhow!("REDIS_URL cannot be empty"));
        }

        if self.engine.vendor_timeout_secs == 0 {
            return Err(anyhow!("VENDOR_TIMEOUT_SECS must be greater than 0"));
        }

        if self.engine.sweep_interval_secs == 0 {
            return Err(anyhow!("SWEEP_INTERVAL_SECS must be greater than 0"));
        }

        if self.engine.sweep_batch_size <= 0 {
            return Err(anyhow!("SWEEP_BATCH_SIZE must be greater than 0"));
        }

        if self.referral.first_purchase_bonus < Decimal::ZERO {
            return Err(anyhow!("REFERRAL_FIRST_PURCHASE_BONUS cannot be negative"));
        }

        for (name, rate) in [
            ("REFERRAL_BASE_RATE", self.referral.base_rate),
            ("REFERRAL_BOOSTED_RATE", self.referral.boosted_rate),
        ] {
            if rate < Decimal::ZERO || rate >= Decimal::ONE {
                return Err(anyhow!("{} must be in [0, 1), got {}", name, rate));
            }
        }

        if self.referral.boost_threshold <= Decimal::ZERO {
            return Err(anyhow!("REFERRAL_BOOST_THRESHOLD must be greater than 0"));
        }

        if self.funding.webhook_secret.trim().is_empty() {
            return Err(anyhow!("FUNDING_WEBHOOK_SECRET cannot be empty"));
        }

        Ok(())
    }
}
