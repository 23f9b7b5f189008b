//! visa-list: list discovered instrument resources and exit

use anyhow::Result;
use clap::Parser;

use measurement_tools::config::ToolsConfig;
use measurement_tools::hardware::ResourceManager;
use measurement_tools::interact::ResourceCache;
use measurement_tools::logging;

/// List discovered VISA and serial resources and exit.
#[derive(Parser, Debug)]
#[command(name = "visa-list", version)]
struct Args {
    /// Also show the role each resource is cached under
    #[arg(short, long)]
    roles: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ToolsConfig::load()?;
    logging::init_from_config(&config, args.verbose)?;

    let rm = ResourceManager::system();
    let resources = rm.list_resources().await?;
    let cache = if args.roles {
        ResourceCache::load(&config.cache.path)?
    } else {
        None
    };

    println!("(");
    for resource in &resources {
        match cache.as_ref().and_then(|c| c.role_for(resource)) {
            Some(role) => println!("    '{}',  # {}", resource, role),
            None => println!("    '{}',", resource),
        }
    }
    println!(")");
    Ok(())
}
