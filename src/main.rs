// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

use clap::Parser;
use mcrouter::{
    Application, CliArgs, ConfigProvider, CurrentProcess, HostCommand, InstallSpec,
    ProcessIdentity, RouterConfiguration, Severity, TomlConfigStore, host_for, init_tracing,
};
use mcrouter::logging::scope;
use std::path::Path;
use std::sync::Arc;

const EXIT_OK: i32 = 0;
/// Host or dispatcher registration failed
const EXIT_HOST_FAILED: i32 = -1;
/// Service install or uninstall failed
const EXIT_INSTALL_FAILED: i32 = -2;
/// Fatal startup error
const EXIT_STARTUP_FAILED: i32 = -3;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_tracing(args.verbose);

    let code = run(&args).await;
    std::process::exit(code);
}

async fn run(args: &CliArgs) -> i32 {
    let config_path = args.config_path();
    let mut store = match TomlConfigStore::load(&config_path) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, path = %config_path.display(), "Failed to load configuration");
            return EXIT_STARTUP_FAILED;
        }
    };
    let mut config = match RouterConfiguration::from_provider(&store) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return EXIT_STARTUP_FAILED;
        }
    };
    config.verbose |= args.verbose;

    let identity: Arc<dyn ProcessIdentity> = Arc::new(CurrentProcess::new());
    let command = args.command();

    match command {
        HostCommand::Install | HostCommand::Uninstall => {
            manage_service(command, &mut store, &config, identity.as_ref(), &config_path)
        }
        HostCommand::RunConsole | HostCommand::RunService => {
            if command == HostCommand::RunConsole {
                config.print_summary();
            }
            serve(command, config, identity).await
        }
    }
}

async fn serve(
    command: HostCommand,
    config: RouterConfiguration,
    identity: Arc<dyn ProcessIdentity>,
) -> i32 {
    tracing::info!(pid = identity.id(), app = %identity.app_name(), "Router starting");

    let mut app = Application::new(config, identity);
    if let Err(e) = app.initialize().await {
        tracing::error!(error = %e, "Failed to start the router");
        return EXIT_STARTUP_FAILED;
    }

    let Some(router) = app.router().cloned() else {
        tracing::error!("Router handle missing after start");
        let _ = app.release().await;
        return EXIT_HOST_FAILED;
    };

    let mut host = host_for(command);
    if let Err(e) = host.attach(router, app.quit_token()) {
        app.log_sink().log_message(
            Severity::Error,
            scope::HOST,
            &format!("Failed to attach {} host: {}", host.kind(), e),
        );
        let _ = app.release().await;
        return EXIT_HOST_FAILED;
    }
    app.log_sink().log_message(
        Severity::Info,
        scope::HOST,
        &format!("Router running under the {} host", host.kind()),
    );

    app.wait_for_quit().await;

    if let Err(e) = app.release().await {
        tracing::warn!(error = %e, "Release failed");
    }
    tracing::info!("Router stopped");
    EXIT_OK
}

fn manage_service(
    command: HostCommand,
    store: &mut TomlConfigStore,
    config: &RouterConfiguration,
    identity: &dyn ProcessIdentity,
    config_path: &Path,
) -> i32 {
    let host = host_for(command);
    let config_path = std::path::absolute(config_path).unwrap_or_else(|_| config_path.to_path_buf());
    let spec = InstallSpec {
        service_name: config.service_name.clone(),
        executable: identity.full_path(),
        config_path,
        unit_path: config.unit_path.clone(),
    };

    if command == HostCommand::Uninstall {
        return match host.uninstall(&spec) {
            Ok(()) => EXIT_OK,
            Err(e) => {
                tracing::error!(error = %e, "Uninstall failed");
                EXIT_INSTALL_FAILED
            }
        };
    }

    if let Err(e) = host.install(&spec) {
        tracing::error!(error = %e, "Install failed");
        return EXIT_INSTALL_FAILED;
    }

    // Remember where the unit went so uninstall finds it
    store.set_string("service", "name", &spec.service_name);
    store.set_string("service", "unit_path", &spec.unit_path.to_string_lossy());
    if let Err(e) = store.save() {
        tracing::warn!(error = %e, "Installed, but the configuration was not saved");
    }
    println!("✓ Installed {} ({})", spec.service_name, spec.unit_path.display());
    EXIT_OK
}
