/// # mini_es Example: Bank Account
///
/// A `BankAccount` aggregate records deposits and withdrawals, is snapshotted every 3 events
/// and notifies an audit subscriber once its events are stored. A second writer working on a
/// stale copy shows how concurrency conflicts surface.
///
/// ## Usage
///
/// ```sh
/// RUST_LOG=mini_es=debug cargo run --example bank_account
/// ```
use std::sync::{Arc, LazyLock};

use anyhow::bail;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use mini_es::{
    AggregateRoot, DispatcherConfig, EventDispatcher, EventRegistry, EventStore, EventStoreConfig,
    EventSubscriber, HandlerTable, InMemoryBackend, PublishedEvent, Root, SnapshotHooks,
    SnapshotStore,
};

// Events
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountOpened {
    owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MoneyDeposited {
    amount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MoneyWithdrawn {
    amount: u64,
}

// Aggregate
#[derive(Debug)]
struct BankAccount {
    root: Root<BankAccount>,
    owner: String,
    balance: u64,
}

#[derive(Serialize, Deserialize)]
struct BankAccountState {
    owner: String,
    balance: u64,
}

static HANDLERS: LazyLock<HandlerTable<BankAccount>> = LazyLock::new(|| {
    HandlerTable::<BankAccount>::new()
        .on::<AccountOpened, _>(|account, event| {
            account.owner = event.owner.clone();
            Ok(())
        })
        .on::<MoneyDeposited, _>(|account, event| {
            account.balance += event.amount;
            Ok(())
        })
        .on::<MoneyWithdrawn, _>(|account, event| {
            if event.amount > account.balance {
                bail!(
                    "cannot withdraw {} from a balance of {}",
                    event.amount,
                    account.balance
                );
            }
            account.balance -= event.amount;
            Ok(())
        })
});

impl AggregateRoot for BankAccount {
    const NAME: &'static str = "BankAccount";
    const SNAPSHOT_REVISION: Option<u32> = Some(1);

    fn new(root: Root<Self>) -> Self {
        Self {
            root,
            owner: String::new(),
            balance: 0,
        }
    }

    fn root(&self) -> &Root<Self> {
        &self.root
    }

    fn root_mut(&mut self) -> &mut Root<Self> {
        &mut self.root
    }

    fn handlers() -> &'static HandlerTable<Self> {
        &HANDLERS
    }

    fn snapshot_hooks() -> Option<SnapshotHooks<Self>> {
        Some(
            SnapshotHooks::capture(|account: &BankAccount| {
                Ok(serde_json::to_value(BankAccountState {
                    owner: account.owner.clone(),
                    balance: account.balance,
                })?)
            })
            .with_restore(|account: &mut BankAccount, state| {
                let state: BankAccountState = serde_json::from_value(state)?;
                account.owner = state.owner;
                account.balance = state.balance;
                Ok(())
            }),
        )
    }
}

// Subscriber
struct AuditLog;

#[async_trait]
impl EventSubscriber for AuditLog {
    fn subscribed_to(&self) -> Vec<String> {
        vec!["MoneyDeposited".to_string(), "MoneyWithdrawn".to_string()]
    }

    async fn handle(&self, event: &PublishedEvent) -> anyhow::Result<()> {
        println!(
            "AUDIT: {} #{} on {} ({:?})",
            event.event_name,
            event.aggregate_root_version,
            event.aggregate_root_id,
            event.payload()
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut registry = EventRegistry::new();
    registry
        .register::<AccountOpened>("AccountOpened")?
        .register::<MoneyDeposited>("MoneyDeposited")?
        .register::<MoneyWithdrawn>("MoneyWithdrawn")?;
    let registry = Arc::new(registry);

    let config = EventStoreConfig::from_json_str(
        r#"{ "snapshot": { "kind": "by_count", "every": 3 } }"#,
    )?;
    let backend = InMemoryBackend::new();
    let subscribers: Vec<Arc<dyn EventSubscriber>> = vec![Arc::new(AuditLog)];

    let store = EventStore::new(Arc::new(backend.clone()), Arc::clone(&registry))
        .with_snapshots(SnapshotStore::new(
            Arc::new(backend.clone()),
            config.snapshot.build(&registry)?,
        ))
        .with_dispatcher(EventDispatcher::bind_subscriptions(
            subscribers,
            DispatcherConfig::default(),
        ));

    let mut account: BankAccount = store.create(Some("acc-42".to_string())).await?;
    account.record(AccountOpened {
        owner: "Grace".to_string(),
    })?;
    account.record(MoneyDeposited { amount: 100 })?;
    account.commit().await?;

    account.record(MoneyWithdrawn { amount: 30 })?;
    account.record(MoneyDeposited { amount: 5 })?;
    account.commit().await?;
    println!(
        "MAIN: {} has {} at version {}",
        account.owner,
        account.balance,
        account.version()
    );

    if let Err(err) = account.record(MoneyWithdrawn { amount: 500 }) {
        println!("MAIN: rejected: {err}");
    }

    let mut stale: BankAccount = store.load_with_snapshot("acc-42").await?;
    account.record(MoneyDeposited { amount: 1 })?;
    account.commit().await?;

    stale.record(MoneyWithdrawn { amount: 10 })?;
    if let Err(err) = stale.commit().await {
        println!("MAIN: stale writer lost: {err}");
    }

    let reloaded: BankAccount = store.load_with_snapshot("acc-42").await?;
    assert_eq!(reloaded.balance, account.balance);
    println!(
        "MAIN: reloaded {} with {} at version {}, {} snapshot(s) stored",
        reloaded.owner,
        reloaded.balance,
        reloaded.version(),
        backend.snapshots_of("acc-42").await.len()
    );

    Ok(())
}
