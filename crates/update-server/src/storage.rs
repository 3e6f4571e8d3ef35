//! Redis storage for licenses, instances and the release catalog
//!
//! Every entity is stored as a JSON value under a typed key prefix with set
//! membership indexes and secondary lookup keys. Latest-release resolution
//! uses a per-`(product, channel)` sorted set scored by `released_at`, so
//! "latest" is the newest upload on the channel, not the highest version.
//!
//! `Storage` is a cheap handle over a shared connection manager: clone it
//! freely, every method takes `&self`, and concurrent requests proceed
//! without any process-wide lock. The one sequence that needs serialization
//! (the activation read-or-insert) is guarded by the caller, keyed by the
//! derived instance id.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use updates_common::{Channel, Heartbeat, Instance, InstanceStatus, License, Release};

/// Storage backend for the control plane registries
#[derive(Clone)]
pub struct Storage {
    conn: ConnectionManager,
}

impl Storage {
    /// Create a new storage instance
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    // ---------------------------------------------------------------- licenses

    /// Persist a new license and its key index
    pub async fn create_license(&self, license: &License) -> Result<()> {
        let json = serde_json::to_string(license).context("Failed to serialize license")?;
        let mut conn = self.conn();

        let _: () = conn.set(format!("license:{}", license.id), json).await?;
        let _: () = conn
            .set(format!("license:key:{}", license.license_key), &license.id)
            .await?;
        let _: () = conn.sadd("licenses:all", &license.id).await?;

        info!("Created license {} for {}", license.id, license.customer_id);
        Ok(())
    }

    pub async fn get_license(&self, id: &str) -> Result<Option<License>> {
        let json: Option<String> = self.conn().get(format!("license:{}", id)).await?;

        match json {
            Some(data) => {
                let license = serde_json::from_str(&data).context("Failed to deserialize license")?;
                Ok(Some(license))
            }
            None => Ok(None),
        }
    }

    pub async fn get_license_by_key(&self, key: &str) -> Result<Option<License>> {
        let id: Option<String> = self.conn().get(format!("license:key:{}", key)).await?;

        match id {
            Some(id) => self.get_license(&id).await,
            None => Ok(None),
        }
    }

    /// All licenses, newest first
    pub async fn list_licenses(&self) -> Result<Vec<License>> {
        let ids: Vec<String> = self.conn().smembers("licenses:all").await?;

        let mut licenses = Vec::new();
        for id in ids {
            if let Some(license) = self.get_license(&id).await? {
                licenses.push(license);
            }
        }

        licenses.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(licenses)
    }

    /// Overwrite an existing license. The license key is immutable, so the
    /// key index never needs repointing.
    pub async fn update_license(&self, license: &License) -> Result<()> {
        let json = serde_json::to_string(license).context("Failed to serialize license")?;
        let _: () = self
            .conn()
            .set(format!("license:{}", license.id), json)
            .await?;

        debug!("Updated license {}", license.id);
        Ok(())
    }

    /// Delete a license. Instances referencing it keep running but lose the
    /// weak reference and cannot re-activate.
    pub async fn delete_license(&self, id: &str) -> Result<bool> {
        let Some(license) = self.get_license(id).await? else {
            return Ok(false);
        };

        let mut conn = self.conn();
        let _: () = conn.del(format!("license:{}", id)).await?;
        let _: () = conn
            .del(format!("license:key:{}", license.license_key))
            .await?;
        let _: () = conn.srem("licenses:all", id).await?;

        // Orphan any instance that still points at this license.
        for mut instance in self.list_instances().await? {
            if instance.license_id.as_deref() == Some(id) {
                instance.license_id = None;
                instance.updated_at = Utc::now();
                self.update_instance(&instance).await?;
            }
        }

        info!("Deleted license {}", id);
        Ok(true)
    }

    // --------------------------------------------------------------- instances

    /// Persist a new instance with its name and credential indexes
    pub async fn create_instance(&self, instance: &Instance) -> Result<()> {
        let json = serde_json::to_string(instance).context("Failed to serialize instance")?;
        let mut conn = self.conn();

        let _: () = conn.set(format!("instance:{}", instance.id), json).await?;
        let _: () = conn
            .set(format!("instance:name:{}", instance.instance_id), &instance.id)
            .await?;
        if !instance.api_key_hash.is_empty() {
            let _: () = conn
                .set(format!("instance:auth:{}", instance.api_key_hash), &instance.id)
                .await?;
        }
        let _: () = conn.sadd("instances:all", &instance.id).await?;

        info!("Registered instance {} ({})", instance.instance_id, instance.id);
        Ok(())
    }

    pub async fn get_instance(&self, id: &str) -> Result<Option<Instance>> {
        let json: Option<String> = self.conn().get(format!("instance:{}", id)).await?;

        match json {
            Some(data) => {
                let instance =
                    serde_json::from_str(&data).context("Failed to deserialize instance")?;
                Ok(Some(instance))
            }
            None => Ok(None),
        }
    }

    pub async fn get_instance_by_name(&self, instance_id: &str) -> Result<Option<Instance>> {
        let id: Option<String> = self
            .conn()
            .get(format!("instance:name:{}", instance_id))
            .await?;

        match id {
            Some(id) => self.get_instance(&id).await,
            None => Ok(None),
        }
    }

    pub async fn get_instance_by_api_key_hash(&self, hash: &str) -> Result<Option<Instance>> {
        let id: Option<String> = self.conn().get(format!("instance:auth:{}", hash)).await?;

        match id {
            Some(id) => self.get_instance(&id).await,
            None => Ok(None),
        }
    }

    /// All instances, newest first
    pub async fn list_instances(&self) -> Result<Vec<Instance>> {
        let ids: Vec<String> = self.conn().smembers("instances:all").await?;

        let mut instances = Vec::new();
        for id in ids {
            if let Some(instance) = self.get_instance(&id).await? {
                instances.push(instance);
            }
        }

        instances.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(instances)
    }

    /// Overwrite an existing instance, repointing the credential index when
    /// the API key hash changed (the old key stops resolving immediately).
    pub async fn update_instance(&self, instance: &Instance) -> Result<()> {
        let mut conn = self.conn();

        if let Some(existing) = self.get_instance(&instance.id).await? {
            if !existing.api_key_hash.is_empty() && existing.api_key_hash != instance.api_key_hash {
                let _: () = conn
                    .del(format!("instance:auth:{}", existing.api_key_hash))
                    .await?;
            }
        }

        let json = serde_json::to_string(instance).context("Failed to serialize instance")?;
        let _: () = conn.set(format!("instance:{}", instance.id), json).await?;
        if !instance.api_key_hash.is_empty() {
            let _: () = conn
                .set(format!("instance:auth:{}", instance.api_key_hash), &instance.id)
                .await?;
        }

        debug!("Updated instance {}", instance.instance_id);
        Ok(())
    }

    pub async fn delete_instance(&self, id: &str) -> Result<bool> {
        let Some(instance) = self.get_instance(id).await? else {
            return Ok(false);
        };

        let mut conn = self.conn();
        let _: () = conn.del(format!("instance:{}", id)).await?;
        let _: () = conn
            .del(format!("instance:name:{}", instance.instance_id))
            .await?;
        if !instance.api_key_hash.is_empty() {
            let _: () = conn
                .del(format!("instance:auth:{}", instance.api_key_hash))
                .await?;
        }
        let _: () = conn.srem("instances:all", id).await?;

        info!("Deleted instance {}", instance.instance_id);
        Ok(true)
    }

    /// Record a heartbeat against an instance. Unknown instances are a
    /// no-op: an agent that lost its registration must re-activate.
    /// Concurrent heartbeats keep the newest timestamp.
    pub async fn apply_heartbeat(&self, instance_id: &str, hb: &Heartbeat) -> Result<bool> {
        let Some(mut instance) = self.get_instance_by_name(instance_id).await? else {
            debug!("Heartbeat from unregistered instance {}", instance_id);
            return Ok(false);
        };

        let now = Utc::now();
        instance.last_heartbeat = Some(match instance.last_heartbeat {
            Some(prev) if prev > now => prev,
            _ => now,
        });
        instance.last_heartbeat_data = Some(hb.clone());
        instance.status = InstanceStatus::Online;
        instance.updated_at = now;

        self.update_instance(&instance).await?;
        Ok(true)
    }

    /// Sweep online instances whose last heartbeat is older than `threshold`
    /// into the offline state. Returns the affected instance names.
    pub async fn mark_offline_instances(&self, threshold: Duration) -> Result<Vec<String>> {
        let cutoff = Utc::now() - threshold;
        let mut swept = Vec::new();

        for mut instance in self.list_instances().await? {
            if instance.status != InstanceStatus::Online {
                continue;
            }
            let stale = match instance.last_heartbeat {
                Some(at) => at < cutoff,
                None => instance.updated_at < cutoff,
            };
            if stale {
                instance.status = InstanceStatus::Offline;
                instance.updated_at = Utc::now();
                self.update_instance(&instance).await?;
                swept.push(instance.instance_id);
            }
        }

        Ok(swept)
    }

    // ---------------------------------------------------------------- releases

    /// Whether a release row exists for `(product, version)`
    pub async fn release_exists(&self, product: &str, version: &str) -> Result<bool> {
        let exists: bool = self
            .conn()
            .exists(format!("release:pv:{}:{}", product, version))
            .await?;
        Ok(exists)
    }

    /// Persist a new release and all its indexes. `(product, version)`
    /// uniqueness is checked at the admin layer; a concurrent re-upload is
    /// last-writer-wins.
    pub async fn create_release(&self, release: &Release) -> Result<()> {
        let json = serde_json::to_string(release).context("Failed to serialize release")?;
        let mut conn = self.conn();

        let _: () = conn.set(format!("release:{}", release.id), json).await?;
        let _: () = conn
            .set(
                format!("release:pv:{}:{}", release.product_name, release.version),
                &release.id,
            )
            .await?;
        let _: () = conn.sadd("releases:all", &release.id).await?;
        let _: () = conn
            .sadd(format!("releases:product:{}", release.product_name), &release.id)
            .await?;
        let _: () = conn
            .zadd(
                format!("releases:channel:{}:{}", release.product_name, release.channel),
                &release.id,
                release.released_at.timestamp_millis(),
            )
            .await?;

        info!(
            "Cataloged release {} {} on {}",
            release.product_name, release.version, release.channel
        );
        Ok(())
    }

    pub async fn get_release_by_id(&self, id: &str) -> Result<Option<Release>> {
        let json: Option<String> = self.conn().get(format!("release:{}", id)).await?;

        match json {
            Some(data) => {
                let release = serde_json::from_str(&data).context("Failed to deserialize release")?;
                Ok(Some(release))
            }
            None => Ok(None),
        }
    }

    pub async fn get_release(&self, product: &str, version: &str) -> Result<Option<Release>> {
        let id: Option<String> = self
            .conn()
            .get(format!("release:pv:{}:{}", product, version))
            .await?;

        match id {
            Some(id) => self.get_release_by_id(&id).await,
            None => Ok(None),
        }
    }

    /// Most recently published release on a channel. Publication time is the
    /// ordering authority, not version strings.
    pub async fn latest_release(&self, product: &str, channel: Channel) -> Result<Option<Release>> {
        let ids: Vec<String> = self
            .conn()
            .zrevrange(format!("releases:channel:{}:{}", product, channel), 0, 0)
            .await?;

        match ids.first() {
            Some(id) => self.get_release_by_id(id).await,
            None => Ok(None),
        }
    }

    /// All releases, newest first
    pub async fn list_releases(&self) -> Result<Vec<Release>> {
        let ids: Vec<String> = self.conn().smembers("releases:all").await?;
        self.collect_releases(ids).await
    }

    /// Releases for one product, newest first
    pub async fn list_product_releases(&self, product: &str) -> Result<Vec<Release>> {
        let ids: Vec<String> = self
            .conn()
            .smembers(format!("releases:product:{}", product))
            .await?;
        self.collect_releases(ids).await
    }

    async fn collect_releases(&self, ids: Vec<String>) -> Result<Vec<Release>> {
        let mut releases = Vec::new();
        for id in ids {
            if let Some(release) = self.get_release_by_id(&id).await? {
                releases.push(release);
            }
        }

        releases.sort_by(|a, b| b.released_at.cmp(&a.released_at));
        Ok(releases)
    }

    /// Remove a release row and all of its indexes
    pub async fn delete_release(&self, release: &Release) -> Result<()> {
        let mut conn = self.conn();

        let _: () = conn.del(format!("release:{}", release.id)).await?;
        let _: () = conn
            .del(format!("release:pv:{}:{}", release.product_name, release.version))
            .await?;
        let _: () = conn.srem("releases:all", &release.id).await?;
        let _: () = conn
            .srem(format!("releases:product:{}", release.product_name), &release.id)
            .await?;
        let _: () = conn
            .zrem(
                format!("releases:channel:{}:{}", release.product_name, release.channel),
                &release.id,
            )
            .await?;

        info!("Deleted release {} {}", release.product_name, release.version);
        Ok(())
    }
}
