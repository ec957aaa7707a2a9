use clap::Parser;
use log::{error, info};
use netlyzer::configuration::config::CliArgs;
use netlyzer::controller::controller_handler::Controller;
use netlyzer::data_capture::backend::default_backend;
use std::sync::Arc;

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    println!(
        "
==============================================================================
               netlyzer: live packet capture and classification
==============================================================================
"
    );

    let args = CliArgs::parse();

    if args.list_devices {
        match default_backend().list_devices() {
            Ok(devices) if devices.is_empty() => println!("No capture devices available"),
            Ok(devices) => {
                for device in devices {
                    match device.description {
                        Some(desc) => println!("{}\t{}", device.name, desc),
                        None => println!("{}", device.name),
                    }
                }
            }
            Err(e) => {
                error!("Unable to list capture devices: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    info!("Importing configuration");
    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Configuration imported successfully");

    // storage backends may own a runtime of their own, so the controller is
    // built and dropped outside the async runtime below
    let controller = match Controller::new(config) {
        Ok(controller) => Arc::new(controller),
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Unable to start the async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(Arc::clone(&controller).run());
    drop(runtime);
    drop(controller);

    if let Err(e) = result {
        error!("Error occured in the controller process: {}, exiting...", e);
        std::process::exit(1);
    }
    info!("Bye");
}
