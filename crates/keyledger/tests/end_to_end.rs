//! End-to-end flows across devices, the ledger, and advisors.

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use keyledger::core::{now_millis, Algorithm, CoreError, RecordCodec, TAG_LEN};
use keyledger::grants::{AccessOutcome, DenialReason, GrantError};
use keyledger::store::{MemoryStore, SqliteStore, Store};
use keyledger::sync::{limits, ConvergenceResult, Ledger, MemoryLedger, SyncError};
use keyledger::*;

const PHRASE: &str = "orbit maple canyon velvet harbor lantern quartz meadow \
                      falcon ember willow summit copper tundra violet anchor \
                      prairie saddle juniper glacier thistle beacon marble cedar";

type MemVault = Vault<MemoryStore, Arc<MemoryLedger>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn account() -> AccountId {
    AccountId::new("acct")
}

fn session() -> Session {
    Session::unlock(
        account(),
        RootSecret::from_recovery_phrase(PHRASE).unwrap(),
    )
}

async fn vault(ledger: &Arc<MemoryLedger>, device: u8) -> MemVault {
    vault_with(ledger, device, VaultConfig::default()).await
}

async fn vault_with(ledger: &Arc<MemoryLedger>, device: u8, config: VaultConfig) -> MemVault {
    Vault::new(
        session(),
        DeviceId::from_bytes([device; 16]),
        MemoryStore::new(),
        Arc::clone(ledger),
        config,
    )
    .await
    .unwrap()
}

fn unit(s: &str) -> EncryptionUnit {
    s.parse().unwrap()
}

fn date(s: &str) -> CoarseDate {
    s.parse().unwrap()
}

fn advisor(name: &str) -> Recipient {
    Recipient::Advisor(AdvisorId::new(name))
}

#[tokio::test]
async fn test_write_read_and_history() -> Result<()> {
    init_tracing();
    let ledger = MemoryLedger::shared();
    let vault = vault(&ledger, 1).await;

    let first = vault
        .write_record(unit("identity"), None, None, b"passport v1")
        .await?;
    assert_eq!(first.data_version, 1);

    let second = vault
        .write_record(unit("identity"), Some(first.record_id), None, b"passport v2")
        .await?;
    assert_eq!(second.data_version, 2);
    assert_eq!(second.created_at, first.created_at);

    let current = vault.read_record(&first.record_id).await?;
    assert_eq!(current.payload, b"passport v2");

    let history = vault.history(&first.record_id).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].data_version, 1);

    let old = vault.read_version(&first.record_id, 1).await?;
    assert_eq!(old.payload, b"passport v1");
    assert!(matches!(
        vault.read_version(&first.record_id, 7).await,
        Err(VaultError::VersionNotFound { data_version: 7, .. })
    ));
    assert!(matches!(
        vault.read_record(&RecordId::from_bytes([0xEE; 16])).await,
        Err(VaultError::RecordNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_record_must_stay_in_its_unit() -> Result<()> {
    let ledger = MemoryLedger::shared();
    let vault = vault(&ledger, 1).await;

    let record = vault
        .write_record(unit("presence/2025-Q1"), None, Some(date("2025-02-01")), b"x")
        .await?;
    assert!(matches!(
        vault
            .write_record(unit("presence/2025-Q2"), Some(record.record_id), None, b"y")
            .await,
        Err(VaultError::InvalidOperation(_))
    ));
    assert!(matches!(
        vault
            .write_record(unit("presence/2025-Q1"), None, Some(date("2025-04-01")), b"z")
            .await,
        Err(VaultError::InvalidOperation(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_two_devices_converge() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let ledger = MemoryLedger::shared();
    let phone = vault(&ledger, 1).await;
    let laptop = Vault::new(
        session(),
        DeviceId::from_bytes([2; 16]),
        SqliteStore::open(dir.path().join("laptop.db"))?,
        Arc::clone(&ledger),
        VaultConfig::default(),
    )
    .await?;

    let q1 = unit("presence/2025-Q1");
    let record = phone
        .write_record(q1, None, Some(date("2025-02-10")), b"in lisbon")
        .await?;
    let report = phone.sync().await?;
    assert!(report.is_clean());
    assert_eq!(report.units[0].pushed, 1);

    let report = laptop.sync().await?;
    assert!(report.is_clean());
    let seen = laptop.read_record(&record.record_id).await?;
    assert_eq!(seen.payload, b"in lisbon");
    assert_eq!(seen.record_date, Some(date("2025-02-10")));

    assert_eq!(phone.verify_convergence(&q1).await?, ConvergenceResult::Converged);
    assert_eq!(laptop.verify_convergence(&q1).await?, ConvergenceResult::Converged);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_edits_keep_loser_in_history() -> Result<()> {
    init_tracing();
    let ledger = MemoryLedger::shared();
    let a = vault(&ledger, 1).await;
    let b = vault(&ledger, 2).await;
    let docs = unit("documents");

    let record = a.write_record(docs, None, None, b"draft").await?;
    a.sync().await?;
    b.sync().await?;

    a.write_record(docs, Some(record.record_id), None, b"edit from a").await?;
    b.write_record(docs, Some(record.record_id), None, b"edit from b").await?;

    assert!(a.sync().await?.is_clean());
    let report = b.sync().await?;
    assert!(report.is_clean());
    assert_eq!(report.units[0].conflicts, 1);

    assert_eq!(b.read_record(&record.record_id).await?.payload, b"edit from a");

    let losers: Vec<Vec<u8>> = b
        .history(&record.record_id)
        .await?
        .iter()
        .filter(|r| r.data_version == 2)
        .map(|r| b.decrypt_record(r).map(|d| d.payload))
        .collect::<keyledger::Result<_>>()?;
    assert_eq!(losers, vec![b"edit from b".to_vec()]);

    assert!(b.verify_convergence(&docs).await?.is_converged());
    Ok(())
}

#[tokio::test]
async fn test_ambiguous_push_recovers_next_cycle() -> Result<()> {
    let ledger = MemoryLedger::shared();
    let vault = vault(&ledger, 1).await;
    let id = unit("identity");

    vault.write_record(id, None, None, b"x").await?;
    ledger.fail_next_push_after_commit().await;

    let report = vault.sync().await?;
    assert!(report.units[0].ambiguous);
    assert_eq!(report.conflict_pending(), vec![id]);

    let report = vault.sync().await?;
    assert!(report.is_clean());
    assert!(vault.verify_convergence(&id).await?.is_converged());
    Ok(())
}

#[tokio::test]
async fn test_tampered_row_is_integrity_alarm() -> Result<()> {
    let ledger = MemoryLedger::shared();
    let vault = vault(&ledger, 1).await;

    let mut record = vault
        .write_record(unit("identity"), None, None, b"secret")
        .await?;
    let mut ciphertext = record.envelope.ciphertext.to_vec();
    ciphertext[0] ^= 0x01;
    record.envelope.ciphertext = Bytes::from(ciphertext);
    vault.store().put_record(&record, false).await?;

    let err = vault.read_record(&record.record_id).await.unwrap_err();
    assert!(err.is_integrity_alarm());
    assert!(!err.is_transient());
    Ok(())
}

#[tokio::test]
async fn test_period_keys_are_isolated() -> Result<()> {
    let ledger = MemoryLedger::shared();
    let vault = vault(&ledger, 1).await;
    let q1 = unit("presence/2025-Q1");
    let q2 = unit("presence/2025-Q2");

    let k1 = vault.session().unit_key(&q1)?;
    let k2 = vault.session().unit_key(&q2)?;
    assert_ne!(k1.key().as_bytes(), k2.key().as_bytes());

    let codec = RecordCodec::default();
    let envelope = codec.encrypt(&k1, b"q1 only", 0)?;
    assert!(matches!(
        codec.decrypt(&k2, &envelope),
        Err(CoreError::AuthenticationFailure)
    ));

    // A row moved into another unit fails under that unit's key.
    let mut moved = vault.write_record(q1, None, None, b"q1 only").await?;
    moved.unit = q2;
    moved.record_id = RecordId::generate();
    vault.store().put_record(&moved, false).await?;
    assert!(vault
        .read_record(&moved.record_id)
        .await
        .unwrap_err()
        .is_integrity_alarm());
    Ok(())
}

#[tokio::test]
async fn test_locked_vault_refuses_crypto_but_syncs() -> Result<()> {
    let ledger = MemoryLedger::shared();
    let vault = vault(&ledger, 1).await;
    let record = vault
        .write_record(unit("identity"), None, None, b"x")
        .await?;

    vault.lock();
    assert!(vault.is_locked());
    assert!(matches!(
        vault.read_record(&record.record_id).await,
        Err(VaultError::Core(CoreError::SessionLocked))
    ));
    assert!(matches!(
        vault.write_record(unit("identity"), None, None, b"y").await,
        Err(VaultError::Core(CoreError::SessionLocked))
    ));

    assert!(vault.sync().await?.is_clean());
    Ok(())
}

#[tokio::test]
async fn test_narrow_nonce_budget() -> Result<()> {
    let ledger = MemoryLedger::shared();
    let config = VaultConfig {
        algorithm: Algorithm::ChaCha20Poly1305,
        narrow_nonce_limit: 3,
        ..VaultConfig::default()
    };
    let vault = vault_with(&ledger, 1, config).await;
    let id = unit("identity");

    let record = vault.write_record(id, None, None, b"1").await?;
    vault.write_record(id, Some(record.record_id), None, b"2").await?;
    vault.write_record(id, None, None, b"3").await?;

    assert!(matches!(
        vault.write_record(id, None, None, b"4").await,
        Err(VaultError::Core(CoreError::NonceExhaustionRisk { used: 3, limit: 3 }))
    ));

    // Other units have their own keys and budgets.
    vault.write_record(unit("documents"), None, None, b"ok").await?;
    Ok(())
}

#[tokio::test]
async fn test_advisor_sees_only_granted_rows() -> Result<()> {
    init_tracing();
    let ledger = MemoryLedger::shared();
    let vault = vault(&ledger, 1).await;
    let q1 = unit("presence/2025-Q1");

    for (day, payload) in [
        ("2025-01-05", "january"),
        ("2025-02-15", "february"),
        ("2025-03-20", "march"),
    ] {
        vault
            .write_record(q1, None, Some(date(day)), payload.as_bytes())
            .await?;
    }
    vault.write_record(q1, None, None, b"undated").await?;
    vault.write_record(unit("presence/2025-Q2"), None, None, b"q2").await?;
    vault.sync().await?;

    let client = AdvisorClient::new(RecipientSecret::generate());
    let request =
        GrantRequest::new(advisor("x"), client.public_key(), q1).starting(date("2025-02-01"));
    let grant = vault.grant(request).await?;

    let log = AccessLog::new();
    let rows = serve_grant(vault.ledger(), &account(), &grant.id, now_millis(), &log).await?;
    assert_eq!(rows.len(), 2);

    let key = client.open_grant(&grant)?;
    let mut payloads: Vec<String> = client
        .decrypt_rows(&key, &rows)?
        .into_iter()
        .map(|r| String::from_utf8(r.payload).unwrap())
        .collect();
    payloads.sort();
    assert_eq!(payloads, ["february", "march"]);
    assert_eq!(
        log.attempts()[0].outcome,
        AccessOutcome::Served {
            rows: 2,
            withheld: 2
        }
    );

    let again = vault
        .grant(GrantRequest::new(advisor("x"), client.public_key(), q1))
        .await;
    assert!(matches!(
        again,
        Err(VaultError::Grant(GrantError::GrantConflict { .. }))
    ));

    let stranger = AdvisorClient::new(RecipientSecret::generate());
    assert!(stranger.open_grant(&grant).unwrap_err().is_integrity_alarm());

    let revoked = vault.revoke_grant(&grant.id).await?;
    assert!(revoked.is_tombstoned());
    let rows = serve_grant(vault.ledger(), &account(), &grant.id, now_millis(), &log).await?;
    assert!(rows.is_empty());
    assert_eq!(
        log.denials()[0].outcome,
        AccessOutcome::Denied(DenialReason::Tombstoned)
    );
    Ok(())
}

#[tokio::test]
async fn test_anonymous_grant_expires() -> Result<()> {
    let ledger = MemoryLedger::shared();
    let vault = vault(&ledger, 1).await;
    let docs = unit("documents");
    vault.write_record(docs, None, None, b"lease").await?;
    vault.sync().await?;

    let expires_at = now_millis() + 60_000;
    let (grant, credential) = vault.grant_anonymous(docs, None, Some(expires_at)).await?;
    assert_eq!(grant.recipient, Recipient::Anonymous(*credential.token()));

    let client = AdvisorClient::from_credential(&credential);
    let log = AccessLog::new();

    let rows = serve_grant(vault.ledger(), &account(), &grant.id, now_millis(), &log).await?;
    let key = client.open_grant(&grant)?;
    assert_eq!(client.decrypt_rows(&key, &rows)?[0].payload, b"lease");

    let rows = serve_grant(vault.ledger(), &account(), &grant.id, expires_at, &log).await?;
    assert!(rows.is_empty());
    assert_eq!(
        log.denials()[0].outcome,
        AccessOutcome::Denied(DenialReason::Expired)
    );
    Ok(())
}

#[tokio::test]
async fn test_rolling_window_follows_new_periods() -> Result<()> {
    init_tracing();
    let ledger = MemoryLedger::shared();
    let vault = vault(&ledger, 1).await;
    let client = AdvisorClient::new(RecipientSecret::generate());

    let grants = vault
        .grant_rolling_window(advisor("x"), client.public_key(), unit("presence/2025-Q4"), None)
        .await?;
    assert_eq!(grants.len(), 4);

    let renewals = vault.roll_forward("2026-Q1".parse()?).await?;
    assert_eq!(renewals.len(), 1);
    assert!(vault.roll_forward("2026-Q1".parse()?).await?.is_empty());

    let mut active: Vec<String> = vault
        .list_grants()
        .iter()
        .filter(|g| !g.is_tombstoned())
        .map(|g| g.unit.to_string())
        .collect();
    active.sort();
    assert_eq!(
        active,
        [
            "presence/2025-Q2",
            "presence/2025-Q3",
            "presence/2025-Q4",
            "presence/2026-Q1"
        ]
    );

    let new_unit = unit("presence/2026-Q1");
    vault
        .write_record(new_unit, None, Some(date("2026-01-15")), b"new quarter")
        .await?;
    vault.sync().await?;

    let renewed = &renewals[0].grant;
    let log = AccessLog::new();
    let rows = serve_grant(vault.ledger(), &account(), &renewed.id, now_millis(), &log).await?;
    let key = client.open_grant(renewed)?;
    assert_eq!(client.decrypt_rows(&key, &rows)?[0].payload, b"new quarter");

    // The oldest grant rolled off and serves nothing.
    let oldest = vault.get_grant(&grants[0].id).unwrap();
    assert!(oldest.is_tombstoned());
    Ok(())
}

#[tokio::test]
async fn test_advisor_refuses_rows_of_other_units() -> Result<()> {
    let ledger = MemoryLedger::shared();
    let vault = vault(&ledger, 1).await;
    let client = AdvisorClient::new(RecipientSecret::generate());

    let grant = vault
        .grant(GrantRequest::new(advisor("x"), client.public_key(), unit("identity")))
        .await?;
    let other = vault
        .write_record(unit("documents"), None, None, b"not yours")
        .await?;

    let key = client.open_grant(&grant)?;
    assert!(matches!(
        client.decrypt_rows(&key, &[other]),
        Err(VaultError::InvalidOperation(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_recovery_phrase_restores_access() -> Result<()> {
    let ledger = MemoryLedger::shared();
    let original = vault(&ledger, 1).await;
    let record = original
        .write_record(unit("identity"), None, None, b"recoverable")
        .await?;
    original.sync().await?;
    drop(original);

    let shouted = PHRASE.to_uppercase();
    let restored = Vault::new(
        Session::unlock(
            account(),
            RootSecret::from_recovery_phrase(&shouted)?,
        ),
        DeviceId::generate(),
        MemoryStore::new(),
        Arc::clone(&ledger),
        VaultConfig::default(),
    )
    .await?;
    restored.sync().await?;
    assert_eq!(restored.read_record(&record.record_id).await?.payload, b"recoverable");
    Ok(())
}

#[tokio::test]
async fn test_revocation_reaches_every_device_and_the_ledger() -> Result<()> {
    init_tracing();
    let ledger = MemoryLedger::shared();
    let phone = vault(&ledger, 1).await;
    let laptop = vault(&ledger, 2).await;
    let client = AdvisorClient::new(RecipientSecret::generate());
    let id = unit("identity");

    phone.write_record(id, None, None, b"passport").await?;
    phone.sync().await?;
    let grant = phone
        .grant(GrantRequest::new(advisor("x"), client.public_key(), id))
        .await?;

    // The laptop was open before the grant existed; it still refuses a twin.
    let twin = laptop
        .grant(GrantRequest::new(advisor("x"), client.public_key(), id))
        .await;
    assert!(matches!(
        twin,
        Err(VaultError::Grant(GrantError::GrantConflict { existing, .. })) if existing == grant.id
    ));
    assert_eq!(laptop.get_grant(&grant.id), Some(grant.clone()));

    // A device opened later starts out with the grant.
    let tablet = vault(&ledger, 3).await;
    assert_eq!(tablet.list_grants(), vec![grant.clone()]);

    // The advisor keeps its copy; revoking on the laptop still cuts it off.
    let advisor_copy = grant.clone();
    laptop.revoke_grant(&grant.id).await?;
    let log = AccessLog::new();
    let rows = serve_grant(&ledger, &account(), &advisor_copy.id, now_millis(), &log).await?;
    assert!(rows.is_empty());
    assert_eq!(
        log.denials()[0].outcome,
        AccessOutcome::Denied(DenialReason::Tombstoned)
    );

    phone.sync().await?;
    let on_phone = phone.get_grant(&grant.id).unwrap();
    assert!(on_phone.is_tombstoned());
    assert_eq!(phone.store().get_grant(&grant.id).await?, Some(on_phone));
    Ok(())
}

#[tokio::test]
async fn test_unknown_grant_serves_nothing() -> Result<()> {
    let ledger = MemoryLedger::shared();
    let vault = vault(&ledger, 1).await;
    vault.write_record(unit("identity"), None, None, b"x").await?;
    vault.sync().await?;

    let missing = GrantId::from_bytes([0x42; 16]);
    let err = serve_grant(vault.ledger(), &account(), &missing, now_millis(), &AccessLog::new())
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::Grant(GrantError::GrantNotFound(id)) if id == missing));
    Ok(())
}

#[tokio::test]
async fn test_refused_publication_leaves_no_grant() -> Result<()> {
    let ledger = MemoryLedger::shared();
    let vault = vault(&ledger, 1).await;
    let client = AdvisorClient::new(RecipientSecret::generate());
    let request = GrantRequest::new(advisor("x"), client.public_key(), unit("documents"));

    ledger.fail_next_publish().await;
    let err = vault.grant(request.clone()).await.unwrap_err();
    assert!(matches!(err, VaultError::Sync(SyncError::Transport(_))));
    assert!(err.is_transient());
    assert!(vault.list_grants().is_empty());
    assert!(vault.store().list_grants().await?.is_empty());

    let grant = vault.grant(request).await?;
    assert_eq!(ledger.grants(&account()).await?, vec![grant]);
    Ok(())
}

#[tokio::test]
async fn test_offline_revocation_is_published_on_next_sync() -> Result<()> {
    let ledger = MemoryLedger::shared();
    let vault = vault(&ledger, 1).await;
    let client = AdvisorClient::new(RecipientSecret::generate());
    let grant = vault
        .grant(GrantRequest::new(advisor("x"), client.public_key(), unit("identity")))
        .await?;

    ledger.fail_next_publish().await;
    assert!(vault.revoke_grant(&grant.id).await.is_err());
    assert!(vault.get_grant(&grant.id).unwrap().is_tombstoned());
    assert!(!ledger.grant(&account(), &grant.id).await?.unwrap().is_tombstoned());

    assert_eq!(vault.sync_grants().await?, 1);
    assert!(ledger.grant(&account(), &grant.id).await?.unwrap().is_tombstoned());
    Ok(())
}

#[tokio::test]
async fn test_grants_survive_restart() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("phone.db");
    let client = AdvisorClient::new(RecipientSecret::generate());
    let open = |ledger: Arc<MemoryLedger>| {
        let path = path.clone();
        async move {
            Vault::new(
                session(),
                DeviceId::from_bytes([1; 16]),
                SqliteStore::open(path)?,
                ledger,
                VaultConfig::default(),
            )
            .await
        }
    };

    let grants = {
        let phone = open(MemoryLedger::shared()).await?;
        let latest = unit("presence/2025-Q2");
        phone
            .grant_rolling_window(advisor("x"), client.public_key(), latest, Some(2))
            .await?
    };

    // A ledger that has never heard of the grants; the store remembers them.
    let phone = open(MemoryLedger::shared()).await?;
    let mut held: Vec<GrantId> = phone.list_grants().iter().map(|g| g.id).collect();
    let mut issued: Vec<GrantId> = grants.iter().map(|g| g.id).collect();
    held.sort();
    issued.sort();
    assert_eq!(held, issued);

    let q1 = unit("presence/2025-Q1");
    let again = phone
        .grant(GrantRequest::new(advisor("x"), client.public_key(), q1))
        .await;
    assert!(matches!(again, Err(VaultError::Grant(GrantError::GrantConflict { .. }))));
    Ok(())
}

#[tokio::test]
async fn test_oversized_payload_refused_before_sync() -> Result<()> {
    let ledger = MemoryLedger::shared();
    let vault = vault(&ledger, 1).await;
    let docs = unit("documents");

    let small = vault.write_record(docs, None, None, b"receipt").await?;
    let oversized = vec![0u8; limits::MAX_RECORD_BYTES + 1];
    assert!(matches!(
        vault.write_record(docs, None, None, &oversized).await,
        Err(VaultError::InvalidOperation(_))
    ));

    let report = vault.sync().await?;
    assert!(report.is_clean());
    assert_eq!(report.units[0].pushed, 1);
    let rows = ledger.rows(&account(), &docs).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].record_id, small.record_id);

    // The largest payload that fits still goes through.
    let largest = vec![7u8; limits::MAX_RECORD_BYTES - TAG_LEN];
    let record = vault.write_record(docs, None, None, &largest).await?;
    assert_eq!(record.size(), limits::MAX_RECORD_BYTES);
    assert!(vault.sync().await?.is_clean());
    assert!(vault.verify_convergence(&docs).await?.is_converged());
    Ok(())
}
