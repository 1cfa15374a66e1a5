//! Background sweeps that delete expired grant artifacts.
//!
//! Each sweep wraps one service-level cleanup in a [`SweepTask`] so the
//! `sweeper` crate can run it on a timer. Failures surface through the
//! sweeper's own logging and counters and never stop the loop.

use crate::authcode::AuthCodeService;
use crate::device::DeviceCodeService;
use crate::state::AppState;
use crate::token::TokenService;
use crate::uma::UmaService;
use async_trait::async_trait;
use std::time::Duration;
use sweeper::{SweepTask, Sweeper, SweeperOptions};

struct ExpiredCodeSweep {
    codes: AuthCodeService,
}

#[async_trait]
impl SweepTask for ExpiredCodeSweep {
    fn name(&self) -> &str {
        "expired-codes"
    }

    async fn sweep(&self) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.codes.sweep_expired().await?)
    }
}

struct ExpiredTokenSweep {
    tokens: TokenService,
}

#[async_trait]
impl SweepTask for ExpiredTokenSweep {
    fn name(&self) -> &str {
        "expired-tokens"
    }

    async fn sweep(&self) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.tokens.clear_expired_tokens().await?)
    }
}

struct ExpiredDeviceCodeSweep {
    devices: DeviceCodeService,
}

#[async_trait]
impl SweepTask for ExpiredDeviceCodeSweep {
    fn name(&self) -> &str {
        "expired-device-codes"
    }

    async fn sweep(&self) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.devices.sweep_expired().await?)
    }
}

struct ExpiredTicketSweep {
    uma: UmaService,
}

#[async_trait]
impl SweepTask for ExpiredTicketSweep {
    fn name(&self) -> &str {
        "expired-tickets"
    }

    async fn sweep(&self) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.uma.clear_expired_tickets().await?)
    }
}

/// Starts one sweeper per artifact kind. The returned handles stop
/// their background loops when dropped.
pub(crate) fn start_sweepers(state: &AppState) -> Vec<Sweeper> {
    let options = SweeperOptions {
        interval: Duration::from_secs(state.config.sweep.interval),
        initial_delay: Duration::from_secs(state.config.sweep.delay),
    };
    vec![
        Sweeper::start_with_opt(
            ExpiredCodeSweep {
                codes: state.codes.clone(),
            },
            options.clone(),
        ),
        Sweeper::start_with_opt(
            ExpiredTokenSweep {
                tokens: state.tokens.clone(),
            },
            options.clone(),
        ),
        Sweeper::start_with_opt(
            ExpiredDeviceCodeSweep {
                devices: state.devices.clone(),
            },
            options.clone(),
        ),
        Sweeper::start_with_opt(
            ExpiredTicketSweep {
                uma: state.uma.clone(),
            },
            options,
        ),
    ]
}
