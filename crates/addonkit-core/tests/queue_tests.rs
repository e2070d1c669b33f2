//! Work queue scenarios across profiles.

use addonkit_core::context::AppContext;
use addonkit_core::db::PkgDatabase;
use addonkit_core::network::HttpClient;
use addonkit_core::queue::{ManagerRegistry, ManagerWorkQueue, ProfileLoader};
use addonkit_core::{
    AddonkitError, Catalogue, Flavour, GlobalConfig, PkgManager, ProfileConfig, Resolvers, Result,
    StaticCatalogue,
};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct InMemoryLoader {
    ctx: Arc<AppContext>,
    root: PathBuf,
}

#[async_trait]
impl ProfileLoader for InMemoryLoader {
    async fn load(&self, profile: &str) -> Result<PkgManager> {
        let addon_dir = self.root.join(profile);
        std::fs::create_dir_all(&addon_dir)?;
        let config = ProfileConfig::new(
            self.ctx.global_config().await,
            profile,
            addon_dir,
            Some(Flavour::Retail),
        )?;
        Ok(PkgManager::new(
            self.ctx.clone(),
            config,
            PkgDatabase::open_in_memory()?,
            Resolvers::default(),
        ))
    }
}

fn start_queue(temp: &TempDir) -> Arc<ManagerWorkQueue> {
    let ctx = Arc::new(AppContext::new(
        GlobalConfig::new(temp.path().join("config"), temp.path().join("temp")),
        Arc::new(HttpClient::new().unwrap()),
        Arc::new(StaticCatalogue::new(Catalogue::default())),
    ));
    let loader = Arc::new(InMemoryLoader {
        ctx: ctx.clone(),
        root: temp.path().join("addons"),
    });
    let registry = Arc::new(ManagerRegistry::new(loader, ctx.locks.clone()));
    Arc::new(ManagerWorkQueue::start(registry))
}

#[tokio::test]
async fn test_blocked_profile_does_not_block_others() {
    let temp = TempDir::new().unwrap();
    let queue = start_queue(&temp);

    let blocked = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue
                .submit("a", |_| async {
                    std::future::pending::<()>().await;
                    Ok(())
                })
                .await
        })
    };

    let other = tokio::time::timeout(
        Duration::from_secs(5),
        queue.submit("b", |manager| async move {
            Ok(manager.config().profile.clone())
        }),
    )
    .await
    .expect("profile b waited on profile a");
    assert_eq!(other.unwrap(), "b");

    // Same profile: the load lock is released before the operation runs.
    let same = tokio::time::timeout(
        Duration::from_secs(5),
        queue.submit("a", |manager| async move {
            Ok(manager.list_installed()?.len())
        }),
    )
    .await
    .expect("lookup on profile a waited on its running operation");
    assert_eq!(same.unwrap(), 0);

    assert!(!blocked.is_finished());
    blocked.abort();
}

#[tokio::test]
async fn test_panicking_operation_is_isolated() {
    let temp = TempDir::new().unwrap();
    let queue = start_queue(&temp);

    let (panicked, fine) = tokio::join!(
        queue.submit("a", |_| async {
            if true {
                panic!("bad operation");
            }
            Ok(())
        }),
        queue.submit("a", |_| async { Ok("fine") }),
    );
    assert!(matches!(panicked, Err(AddonkitError::OperationPanicked { .. })));
    assert_eq!(fine.unwrap(), "fine");

    queue.shutdown().await;
    assert!(matches!(
        queue.submit("a", |_| async { Ok(()) }).await,
        Err(AddonkitError::QueueClosed)
    ));
}
