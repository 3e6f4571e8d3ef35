//! Bootstrap a host from a license key
//!
//! Activates the license, lays out the install directories, downloads the
//! prescribed products, writes the agent config and credentials, and
//! registers systemd units. Anything that fails before the config is on
//! disk aborts the install; later steps warn and continue.

use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::warn;

use updates_common::{ActivationRequest, Channel, InstallManifest, ProductInstall};

use crate::client::ServerClient;
use crate::config::{AgentConfig, ProductConfig};
use crate::metrics;
use crate::paths::Layout;
use crate::service_control::SystemdController;

#[derive(Debug, Args)]
pub struct InitArgs {
    /// License key (required)
    #[arg(short, long)]
    pub license: String,

    /// Update server URL
    #[arg(short, long, default_value = "https://updates.mysoc.ai")]
    pub server: String,

    /// Instance name (defaults to hostname)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Update channel (stable, beta, nightly)
    #[arg(short, long, default_value = "stable")]
    pub channel: String,
}

pub async fn run(args: InitArgs) -> Result<()> {
    let channel = Channel::from_str(&args.channel)?;
    let hostname = args.name.clone().unwrap_or_else(metrics::hostname);
    let machine_id = read_machine_id();

    println!("mysoc-updater bootstrap");
    println!("  hostname:   {}", hostname);
    println!("  machine id: {}", machine_id);
    println!("  server:     {}", args.server);
    println!();

    // Step 1: activate the license.
    println!("Activating license...");
    let client = ServerClient::new(&args.server, "");
    let activation = client
        .activate(&ActivationRequest {
            license_key: args.license.clone(),
            hostname: hostname.clone(),
            machine_id,
        })
        .await
        .context("failed to activate license")?;

    if !activation.success {
        bail!(
            "license activation failed: {}",
            activation.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    let license = activation.license.context("activation response missing license")?;
    let instance = activation.instance.context("activation response missing instance")?;
    let install = activation.install.context("activation response missing install manifest")?;

    println!("  license valid for {}", license.customer_name);
    println!("  license type {}", license.license_type);
    println!("  expires {}", license.expires_at.format("%Y-%m-%d"));
    println!("  instance id {}", instance.name);
    println!();

    // Step 2: create the install layout.
    let layout = Layout::for_instance_type(&license.license_type);
    println!("Installing to {}...", layout.base().display());
    layout.ensure().context("failed to create install directories")?;

    // Step 3: download the prescribed products. A single product failing
    // does not abort the install.
    println!("Downloading products...");
    let authed = ServerClient::new(&args.server, &instance.api_key);
    for product in &install.products {
        print!("  {} ... ", product.name);
        match download_product(&authed, &layout, product).await {
            Ok(version) => println!("{}", version),
            Err(err) => {
                println!("failed");
                warn!("Failed to download {}: {:#}", product.name, err);
            }
        }
    }
    println!();

    // Step 4: write the agent config and instance credentials.
    println!("Writing configuration...");
    let config = build_config(&args.server, channel, &license.license_type, &license.license_key, &instance.name, &instance.api_key, &install, &layout);
    config
        .save(&layout.config_file())
        .context("failed to save config")?;
    write_credentials(&layout.instance_file(), &instance.name, &instance.api_key)
        .context("failed to save credentials")?;
    println!("  config saved to {}", layout.config_file().display());
    println!();

    // Step 5: register and start services. The host may not run systemd;
    // everything here is best-effort.
    println!("Registering services...");
    if let Err(err) = register_services(&config) {
        warn!("Failed to register services: {:#}", err);
    }

    println!();
    println!("Installation complete.");
    println!("  check status:  mysoc-updater status");
    println!("  start daemon:  systemctl start mysoc-updater");

    Ok(())
}

/// Stable machine identifier, per systemd convention
fn read_machine_id() -> String {
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(data) = std::fs::read_to_string(path) {
            let id = data.trim().to_string();
            if !id.is_empty() {
                return id;
            }
        }
    }
    "unknown".to_string()
}

async fn download_product(
    client: &ServerClient,
    layout: &Layout,
    product: &ProductInstall,
) -> Result<String> {
    let info = client
        .latest_release(&product.name, product.channel, "")
        .await?
        .context("no release found")?;

    let binary = layout.binary(&product.name);
    client
        .download(&info.download_url, &binary, Some(&info.checksum))
        .await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755))
            .context("failed to set permissions")?;
    }

    layout.write_version(&product.name, &info.latest_version)?;
    Ok(info.latest_version)
}

#[allow(clippy::too_many_arguments)]
fn build_config(
    server_url: &str,
    channel: Channel,
    license_type: &str,
    license_key: &str,
    instance_id: &str,
    api_key: &str,
    install: &InstallManifest,
    layout: &Layout,
) -> AgentConfig {
    let mut config = AgentConfig::default();
    config.server.url = server_url.to_string();
    config.server.api_key = api_key.to_string();
    config.instance.id = instance_id.to_string();
    config.instance.instance_type = license_type.to_string();
    config.instance.license_key = license_key.to_string();
    config.update.channel = channel;

    for product in &install.products {
        let health_endpoint = match product.name.as_str() {
            "siemcore-api" | "mysoc-api" => "http://localhost:8080/health".to_string(),
            _ => String::new(),
        };

        config.products.push(ProductConfig {
            name: product.name.clone(),
            service: format!("{}.service", product.name),
            binary: layout.binary(&product.name),
            config: layout.product_config(&product.name),
            health_endpoint,
        });
    }

    config
}

fn write_credentials(path: &Path, instance_id: &str, api_key: &str) -> Result<()> {
    let contents = format!("INSTANCE_ID={}\nAPI_KEY={}\n", instance_id, api_key);
    std::fs::write(path, contents)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

fn register_services(config: &AgentConfig) -> Result<()> {
    let unit_dir = Path::new("/etc/systemd/system");
    if !unit_dir.is_dir() {
        bail!("{} does not exist, skipping service registration", unit_dir.display());
    }

    for product in &config.products {
        let unit = product_unit(&product.name, &product.binary, &product.config);
        std::fs::write(unit_dir.join(&product.service), unit)
            .with_context(|| format!("failed to write unit for {}", product.name))?;
    }

    std::fs::write(unit_dir.join("mysoc-updater.service"), updater_unit())
        .context("failed to write updater unit")?;

    let controller = SystemdController;
    controller.daemon_reload()?;

    for product in &config.products {
        if let Err(err) = controller.enable(&product.service) {
            warn!("Failed to enable {}: {}", product.service, err);
        }
    }
    controller.enable("mysoc-updater.service").ok();

    Ok(())
}

fn product_unit(name: &str, binary: &Path, config: &Path) -> String {
    format!(
        "[Unit]\n\
         Description={name}\n\
         After=network.target\n\
         Wants=mysoc-updater.service\n\
         \n\
         [Service]\n\
         Type=simple\n\
         ExecStart={binary} --config {config}\n\
         Restart=on-failure\n\
         RestartSec=5\n\
         StandardOutput=journal\n\
         StandardError=journal\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        name = name,
        binary = binary.display(),
        config = config.display(),
    )
}

fn updater_unit() -> String {
    "[Unit]\n\
     Description=MySoc Updater Agent\n\
     After=network.target\n\
     \n\
     [Service]\n\
     Type=simple\n\
     ExecStart=/usr/local/bin/mysoc-updater daemon\n\
     Restart=always\n\
     RestartSec=10\n\
     StandardOutput=journal\n\
     StandardError=journal\n\
     \n\
     [Install]\n\
     WantedBy=multi-user.target\n"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use updates_common::InstallManifest;

    #[test]
    fn test_build_config_maps_products() {
        let layout = Layout::new("/opt/siemcore");
        let install = InstallManifest {
            products: vec![
                ProductInstall::latest("siemcore-api"),
                ProductInstall::latest("detection-rules"),
            ],
            config_template: "siemcore-standard".to_string(),
            security_baseline: "cis-level1".to_string(),
        };

        let config = build_config(
            "https://updates.example",
            Channel::Stable,
            "siemcore",
            "SIEM-AAAA-BBBB-CCCC-DDDD",
            "siemcore-host",
            "sk_inst_ab",
            &install,
            &layout,
        );

        assert_eq!(config.instance.id, "siemcore-host");
        assert_eq!(config.server.api_key, "sk_inst_ab");
        assert_eq!(config.products.len(), 2);

        let api = &config.products[0];
        assert_eq!(api.service, "siemcore-api.service");
        assert_eq!(api.binary, Path::new("/opt/siemcore/bin/siemcore-api"));
        assert_eq!(api.health_endpoint, "http://localhost:8080/health");

        let rules = &config.products[1];
        assert!(rules.health_endpoint.is_empty());
    }

    #[test]
    fn test_product_unit_rendering() {
        let unit = product_unit(
            "siemcore-api",
            Path::new("/opt/siemcore/bin/siemcore-api"),
            Path::new("/opt/siemcore/etc/siemcore-api.yaml"),
        );

        assert!(unit.contains("Description=siemcore-api"));
        assert!(unit.contains(
            "ExecStart=/opt/siemcore/bin/siemcore-api --config /opt/siemcore/etc/siemcore-api.yaml"
        ));
        assert!(unit.contains("Restart=on-failure"));
    }

    #[test]
    fn test_credentials_file_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".instance");

        write_credentials(&path, "siemcore-host", "sk_inst_ab").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "INSTANCE_ID=siemcore-host\nAPI_KEY=sk_inst_ab\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
