mod cmd;
mod output;
mod prompts;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hostctr_lib::backend::BackendKind;
use hostctr_lib::info::SystemPackage;
use tracing_subscriber::EnvFilter;

use crate::output::{OutputFormat, print_error};

/// hostctr - system container deployments
#[derive(Parser)]
#[command(name = "hostctr")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Install an image as a system container
  Install {
    /// Image to install
    image: String,

    /// Container name (defaults to the image name)
    #[arg(short, long)]
    name: Option<String>,

    /// Set a template variable (NAME=VALUE), repeatable
    #[arg(long = "set", value_name = "NAME=VALUE")]
    set: Vec<String>,

    /// Ship host files in a system package: auto, build, no or yes
    #[arg(long, value_name = "MODE", default_value = "auto")]
    system_package: SystemPackage,

    /// Use an already unpacked rootfs instead of checking out the image
    #[arg(long, value_name = "DIR")]
    remote: Option<PathBuf>,

    /// Start the service and remove the container if it fails to start
    #[arg(long)]
    controlled: bool,

    /// Directory receiving the package with --system-package=build
    #[arg(long, value_name = "DIR")]
    package_dir: Option<PathBuf>,
  },

  /// Upgrade a container to the latest revision of its image
  Update {
    /// Container name
    name: String,

    /// Set a template variable (NAME=VALUE), repeatable
    #[arg(long = "set", value_name = "NAME=VALUE")]
    set: Vec<String>,

    /// Switch the container to another image
    #[arg(long, value_name = "IMAGE")]
    rebase: Option<String>,

    /// Start the new revision and roll back if it fails to start
    #[arg(long)]
    controlled: bool,
  },

  /// Switch a container back to its previous deployment
  Rollback {
    /// Container name
    name: String,
  },

  /// Remove a container
  Uninstall {
    /// Container name
    name: String,
  },

  /// Delete unreferenced checkouts and store objects
  Prune {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
  },

  /// List containers
  Containers {
    /// Storage to list from: content-store or daemon
    #[arg(long, value_name = "STORAGE")]
    storage: Option<BackendKind>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
  },

  /// Show a container, or the template variables of an image
  Info {
    /// Container name or image
    target: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
  },

  /// List images
  Images {
    /// Include untagged images
    #[arg(short, long)]
    all: bool,

    /// Storage to list from: content-store or daemon
    #[arg(long, value_name = "STORAGE")]
    storage: Option<BackendKind>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
  },

  /// Import an image layout directory into the content store
  Import {
    /// Directory holding manifest.json and layers/
    layout: PathBuf,

    /// Name to store the image under
    image: String,
  },

  /// Delete images
  ImageDelete {
    /// Images to delete
    #[arg(required = true)]
    images: Vec<String>,

    /// Storage to delete from: content-store or daemon
    #[arg(long, value_name = "STORAGE")]
    storage: Option<BackendKind>,

    /// Do not ask for confirmation
    #[arg(short, long)]
    force: bool,
  },

  /// Check out an image's layers into a directory
  Extract {
    /// Image to extract
    image: String,

    /// Destination directory
    destination: PathBuf,
  },
}

fn main() {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  if let Err(e) = run(cli.command) {
    print_error(&format!("{:#}", e));
    std::process::exit(1);
  }
}

fn run(command: Commands) -> Result<()> {
  match command {
    Commands::Install {
      image,
      name,
      set,
      system_package,
      remote,
      controlled,
      package_dir,
    } => cmd::cmd_install(cmd::InstallArgs {
      image,
      name,
      set,
      system_package,
      remote,
      controlled,
      package_dir,
    }),
    Commands::Update {
      name,
      set,
      rebase,
      controlled,
    } => cmd::cmd_update(&name, &set, rebase, controlled),
    Commands::Rollback { name } => cmd::cmd_rollback(&name),
    Commands::Uninstall { name } => cmd::cmd_uninstall(&name),
    Commands::Prune { output } => cmd::cmd_prune(output),
    Commands::Containers { storage, output } => cmd::cmd_containers(storage, output),
    Commands::Info { target, output } => cmd::cmd_info(&target, output),
    Commands::Images { all, storage, output } => cmd::cmd_images(all, storage, output),
    Commands::Import { layout, image } => cmd::cmd_import(&layout, &image),
    Commands::ImageDelete { images, storage, force } => cmd::cmd_image_delete(&images, storage, force),
    Commands::Extract { image, destination } => cmd::cmd_extract(&image, &destination),
  }
}
