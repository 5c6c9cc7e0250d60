//! Subcommand implementations over the contact cache.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use tracing::{info, warn};

use entcache_core::{
    CancelHandle, Config, Entity, EntityCache, FieldValue, PropertyFilter, RestClient, Snapshot,
    TransactionQueue,
};

use crate::contact::Contact;
use crate::credentials::TokenStore;
use crate::pending::PendingJournal;

/// A loaded cache plus the configuration needed to reach the server.
pub struct Session {
    config: Config,
    cache: EntityCache<Contact>,
    snapshot: Snapshot<Contact>,
    journal_path: PathBuf,
    token: Option<String>,
}

impl Session {
    pub fn open(config: Config, cache_file: Option<PathBuf>, token: Option<String>) -> Result<Self> {
        let path = match cache_file {
            Some(path) => path,
            None => config.snapshot_path(Contact::NAME)?,
        };
        let mut cache = EntityCache::new(Contact::NAME)?.with_default_file_path(&path);
        let snapshot = cache
            .load_from_file(None)
            .with_context(|| format!("Failed to load cache from {}", path.display()))?;
        let journal_path = path.with_extension("pending.json");
        PendingJournal::load(&journal_path)?.replay(&mut cache)?;
        Ok(Self {
            config,
            cache,
            snapshot,
            journal_path,
            token,
        })
    }

    /// Write the snapshot and the pending changes.
    fn save(&self) -> Result<()> {
        self.cache.save_to_file(None)?;
        PendingJournal::capture(&self.cache).save(&self.journal_path)
    }

    // ===== Queries =====

    pub fn list(&self, filters: &[String], exact: bool) -> Result<()> {
        let filter = self.parse_filter(filters)?;
        let mut contacts = self.cache.get_entities_by_properties(filter.as_ref(), exact)?;
        contacts.sort_by_key(|c| c.id);

        for contact in &contacts {
            println!(
                "{:>6}  {:<24} {:<10} {}",
                contact.id,
                contact.name,
                contact.status,
                contact.email.as_deref().unwrap_or("-")
            );
        }
        println!("{} contact(s)", contacts.len());
        Ok(())
    }

    pub fn show(&self, id: i64) -> Result<()> {
        let contact = self.cache.get(&id)?;
        for (name, value) in self.cache.descriptor().read(contact) {
            println!("{:<10} {}", name, value);
        }
        Ok(())
    }

    pub fn info(&self) -> Result<()> {
        let path = self
            .cache
            .default_file_path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!("Cache:     {}", path);
        println!("Contacts:  {}", self.cache.len());
        println!(
            "Saved:     {}{}",
            self.snapshot.age_display(),
            if self.snapshot.is_stale() { " (stale)" } else { "" }
        );
        println!(
            "Server:    {}",
            self.config.server_url.as_deref().unwrap_or("(not configured)")
        );
        println!(
            "User:      {}",
            self.config.last_username.as_deref().unwrap_or("(none)")
        );
        let pending = self.cache.pending_counts();
        println!(
            "Pending:   {} added, {} updated, {} deleted",
            pending.added, pending.updated, pending.deleted
        );
        Ok(())
    }

    // ===== Local edits =====

    pub async fn add(
        &mut self,
        id: i64,
        name: String,
        status: String,
        email: Option<String>,
        push: bool,
    ) -> Result<()> {
        self.cache.add(Contact {
            id,
            name,
            status,
            email,
            ..Contact::default()
        })?;
        self.commit(push).await
    }

    pub async fn set(&mut self, id: i64, assignments: &[String], push: bool) -> Result<()> {
        let mut contact = self.cache.get(&id)?.clone();
        let descriptor = self.cache.descriptor();
        for item in assignments {
            let (field, text) = split_assignment(item)?;
            let accessor = descriptor.field(field)?;
            if accessor.name() == descriptor.key_field().name() {
                bail!("The key field '{}' cannot be changed", field);
            }
            accessor.set(&mut contact, cell_value(accessor.is_nullable(), text))?;
        }
        self.cache.update(contact)?;
        self.commit(push).await
    }

    pub async fn delete(&mut self, id: i64, push: bool) -> Result<()> {
        let contact = self.cache.delete(&id)?;
        println!("Deleted {} ({})", contact.name, contact.id);
        self.commit(push).await
    }

    /// Save local edits, then push them when asked to.
    async fn commit(&mut self, push: bool) -> Result<()> {
        self.save()?;
        if push {
            self.push().await?;
        }
        Ok(())
    }

    // ===== Files =====

    pub fn export(&self, path: &Path, filters: &[String], exact: bool, shape: bool) -> Result<()> {
        let filter = self.parse_filter(filters)?;
        if path.as_os_str() == "-" {
            self.cache
                .export_to_writer(io::stdout().lock(), filter.as_ref(), exact, shape)?;
        } else {
            self.cache
                .export_to_csv(path, filter.as_ref(), exact, shape)
                .with_context(|| format!("Failed to export to {}", path.display()))?;
            println!("Exported to {}", path.display());
        }
        Ok(())
    }

    pub fn import(&mut self, path: &Path, shape: bool) -> Result<()> {
        let count = self
            .cache
            .import_from_csv(path, shape)
            .with_context(|| format!("Failed to import {}", path.display()))?;
        self.save()?;
        println!("Imported {} contact(s)", count);
        Ok(())
    }

    // ===== Server =====

    pub async fn pull(&mut self) -> Result<()> {
        let remote = self.remote()?;
        let count = self
            .cache
            .refresh_from_server(&remote)
            .await
            .context("Failed to refresh from server")?;
        self.save()?;
        println!("Pulled {} contact(s)", count);
        Ok(())
    }

    pub async fn push(&mut self) -> Result<()> {
        let remote = self.remote()?;
        let cancel = CancelHandle::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        let result = TransactionQueue::<Contact, _>::new(&remote)
            .on_progress(|event| {
                eprintln!(
                    "{} {}/{}: {}",
                    event.kind, event.sequence, event.total, event.entity.name
                );
            })
            .with_cancel(cancel)
            .run(&mut self.cache)
            .await;
        watcher.abort();

        self.save()?;
        match result {
            Ok(report) => {
                println!(
                    "Pushed {} change(s): {} deleted, {} added, {} updated",
                    report.total(),
                    report.deleted,
                    report.added,
                    report.updated
                );
                Ok(())
            }
            Err(e) => {
                let pending = self.cache.pending_counts().total();
                warn!(pending, "Push incomplete");
                Err(e).with_context(|| {
                    format!(
                        "Push incomplete, {} change(s) remain pending for the next push",
                        pending
                    )
                })
            }
        }
    }

    fn remote(&self) -> Result<RestClient> {
        let url = self
            .config
            .server_url
            .as_deref()
            .context("No server configured; set server_url or ENTCACHE_SERVER_URL")?;
        let mut client = RestClient::with_timeout(url, self.config.request_timeout())?;
        if let Some(token) = self.token() {
            client.set_token(token);
        }
        Ok(client)
    }

    fn token(&self) -> Option<String> {
        if let Some(ref token) = self.token {
            return Some(token.clone());
        }
        let username = self.config.last_username.as_deref()?;
        match TokenStore::for_user(username).and_then(|store| store.load()) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(username, error = %e, "No stored token");
                None
            }
        }
    }

    // ===== Credentials =====

    pub fn login(&mut self, username: &str, token: Option<String>) -> Result<()> {
        let token = token
            .or_else(|| self.token.clone())
            .context("No token given; pass --with-token or set ENTCACHE_TOKEN")?;
        TokenStore::for_user(username)?.save(&token)?;
        self.config.last_username = Some(username.to_string());
        self.config.save()?;
        info!(username, "Token stored");
        println!("Logged in as {}", username);
        Ok(())
    }

    pub fn logout(&mut self) -> Result<()> {
        let username = self
            .config
            .last_username
            .take()
            .context("Not logged in")?;
        TokenStore::for_user(&username)?.forget()?;
        self.config.save()?;
        println!("Logged out {}", username);
        Ok(())
    }

    fn parse_filter(&self, filters: &[String]) -> Result<Option<PropertyFilter>> {
        if filters.is_empty() {
            return Ok(None);
        }
        let descriptor = self.cache.descriptor();
        let mut filter = PropertyFilter::new();
        for item in filters {
            let (field, text) = split_assignment(item)?;
            let accessor = descriptor.field(field)?;
            let value = match cell_value(accessor.is_nullable(), text) {
                FieldValue::Null => FieldValue::Null,
                _ => descriptor.parse_value(field, text)?,
            };
            filter.insert(field, value);
        }
        Ok(Some(filter))
    }
}

fn split_assignment(item: &str) -> Result<(&str, &str)> {
    item.split_once('=')
        .map(|(field, value)| (field.trim(), value))
        .filter(|(field, _)| !field.is_empty())
        .ok_or_else(|| anyhow!("Expected FIELD=VALUE, got '{}'", item))
}

/// An empty value clears a nullable field.
fn cell_value(nullable: bool, text: &str) -> FieldValue {
    if nullable && text.is_empty() {
        FieldValue::Null
    } else {
        FieldValue::Text(text.to_string())
    }
}
