use crate::config::Environment;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log target of this crate, shared by both binaries.
const CRATE_TARGET: &str = "homecollect_backend";

fn default_directives(env: &Environment) -> String {
    match env {
        Environment::Dev => format!("{CRATE_TARGET}=debug,tower_http=debug,info"),
        Environment::Staging => format!("{CRATE_TARGET}=debug,tower_http=info,info"),
        // reqwest/hyper chatter stays at warn in production
        Environment::Prod => format!("{CRATE_TARGET}=info,tower_http=info,warn"),
    }
}

/// Install the global subscriber. `service` names the binary in the first event.
pub fn init_logging(env: &Environment, service: &'static str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(env)));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(env.is_dev())
        .with_line_number(env.is_dev());

    // JSON lines for log shipping in production, pretty output otherwise
    if env.is_prod() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.json().flatten_event(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.pretty())
            .init();
    }

    tracing::info!(service, env = ?env, "Logging initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_parse() {
        for env in [Environment::Dev, Environment::Staging, Environment::Prod] {
            let directives = default_directives(&env);
            assert!(directives.starts_with(CRATE_TARGET));
            assert!(EnvFilter::try_new(&directives).is_ok());
        }
    }
}
