//! The embedded daemon runner.
//!
//! Configuration comes from environment variables (no CLI parsing):
//!
//! - `ZEN_STATE_DIR` — state directory (default `.zen`)
//! - `ZEN_TICK_MS` — daemon tick interval in milliseconds (default 500)
//! - `ZEN_MAX_CONCURRENT` — concurrent agent runs (default 1)
//! - `ZEN_ONESHOT` — set to `1` to drain the queue once and exit
//!
//! The shipped binary wires the scripted stand-in model so the runtime can
//! be smoke-tested end to end; real deployments embed the library and
//! inject their own [`LlmClient`] through an [`AgentFactory`].
//!
//! Exit codes: 0 success (one-shot drain), 1 configuration error,
//! 2 runtime error, 130 interrupted.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing::error;
use tracing_subscriber::EnvFilter;

use zen_agent::agent::{Goal, ZenAgent, ZenAgentConfig};
use zen_agent::error::AgentError;
use zen_agent::llm::LlmClient;
use zen_agent::llm::mock::ScriptedLlm;
use zen_agent::runtime::daemon::AgentFactory;
use zen_agent::runtime::{Daemon, DaemonConfig};

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn build_config() -> DaemonConfig {
    let state_dir = std::env::var("ZEN_STATE_DIR").unwrap_or_else(|_| ".zen".to_owned());
    let mut config = DaemonConfig::new(state_dir);
    config.tick = Duration::from_millis(env_or("ZEN_TICK_MS", 500));
    config.max_concurrent_runs = env_or("ZEN_MAX_CONCURRENT", 1);
    config.oneshot = env_or::<u8>("ZEN_ONESHOT", 0) == 1;
    config
}

fn factory() -> AgentFactory {
    Box::new(|task| {
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlm::new());
        let mut config = ZenAgentConfig::new(Goal::new(&task.goal), llm);
        if let Some(max_steps) = task.max_steps {
            config = config.with_max_steps(max_steps);
        }
        ZenAgent::new(config)
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let daemon = match Daemon::new(build_config(), factory()) {
        Ok(daemon) => daemon,
        Err(e) => {
            error!(error = %e, "daemon construction failed");
            return ExitCode::from(1);
        }
    };

    match daemon.run().await {
        Ok(outcome) => {
            // 0 on a drained one-shot, 130 on interrupt.
            let code = u8::try_from(outcome.exit_code()).unwrap_or(2);
            ExitCode::from(code)
        }
        Err(e @ (AgentError::Config { .. } | AgentError::Storage { .. })) => {
            error!(error = %e, "fatal configuration error");
            ExitCode::from(1)
        }
        Err(e) => {
            error!(error = %e, "daemon failed");
            ExitCode::from(2)
        }
    }
}
