use futures::future::join_all;
use std::collections::HashSet;
use tg_fetchbot::db;
use tg_fetchbot::export::CSV_HEADER;
use tg_fetchbot::registry::UserRegistry;

async fn setup_registry() -> UserRegistry {
    UserRegistry::initialize("sqlite::memory:").await.unwrap()
}

async fn backdate(registry: &UserRegistry, user_id: i64, first_seen: &str) {
    sqlx::query("UPDATE users SET first_seen = ? WHERE user_id = ?")
        .bind(first_seen)
        .bind(user_id)
        .execute(registry.pool())
        .await
        .unwrap();
}

#[tokio::test]
async fn repeat_user_is_recorded_once() {
    let registry = setup_registry().await;

    assert!(registry.add_user(101, Some("Ana"), Some("ana_u")).await);
    assert!(registry.add_user(102, Some("Bo"), None).await);
    assert!(!registry.add_user(101, Some("Ana"), Some("ana_u")).await);

    assert_eq!(registry.get_user_count().await, 2);
}

#[tokio::test]
async fn count_matches_distinct_ids_in_any_order() {
    let registry = setup_registry().await;
    let calls = [5_i64, 3, 5, 9, 1, 3, 3, 9, 42, 1];

    let mut newly_added = 0;
    for id in calls {
        if registry.add_user(id, None, None).await {
            newly_added += 1;
        }
    }

    let distinct: HashSet<i64> = calls.into_iter().collect();
    assert_eq!(registry.get_user_count().await, distinct.len() as i64);
    assert_eq!(newly_added, distinct.len());
}

#[tokio::test]
async fn stats_total_matches_count() {
    let registry = setup_registry().await;
    assert_eq!(
        registry.get_user_stats().await.total_users,
        registry.get_user_count().await
    );

    for id in 1..=4 {
        registry.add_user(id, Some("n"), Some("u")).await;
    }
    backdate(&registry, 1, "2021-06-01 10:00:00.000").await;

    let stats = registry.get_user_stats().await;
    assert_eq!(stats.total_users, registry.get_user_count().await);
    assert_eq!(stats.total_users, 4);
    assert_eq!(stats.users_today, 3);
    assert_eq!(
        stats.first_user_date.map(|d| d.to_rfc3339()),
        Some("2021-06-01T10:00:00+00:00".to_string())
    );
}

#[tokio::test]
async fn concurrent_inserts_never_duplicate() {
    let td = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", td.path().join("users.db").display());
    let registry = UserRegistry::initialize(&url).await.unwrap();

    // 25 racers on one new id plus 25 distinct ids
    let same = (0..25).map(|_| registry.add_user(7, Some("Racer"), None));
    let same_results = join_all(same).await;
    let distinct = (100..125).map(|id| registry.add_user(id, None, None));
    let distinct_results = join_all(distinct).await;

    assert_eq!(same_results.iter().filter(|added| **added).count(), 1);
    assert!(distinct_results.iter().all(|added| *added));
    assert_eq!(registry.get_user_count().await, 26);
}

#[tokio::test]
async fn registry_survives_reopen() {
    let td = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", td.path().join("nested").join("users.db").display());

    let registry = UserRegistry::initialize(&url).await.unwrap();
    assert!(registry.add_user(1, Some("Ana"), None).await);
    registry.pool().close().await;

    let reopened = UserRegistry::initialize(&url).await.unwrap();
    assert!(!reopened.add_user(1, Some("Ana"), None).await);
    assert_eq!(reopened.get_user_count().await, 1);
}

#[tokio::test]
async fn initialize_fails_for_unopenable_store() {
    let td = tempfile::tempdir().unwrap();
    // a directory cannot be opened as a database file
    let url = format!("sqlite://{}", td.path().display());
    assert!(UserRegistry::initialize(&url).await.is_err());
}

#[tokio::test]
async fn queries_degrade_to_defaults_when_store_is_gone() {
    let registry = setup_registry().await;
    registry.add_user(1, None, None).await;
    registry.pool().close().await;

    assert!(!registry.add_user(2, None, None).await);
    assert_eq!(registry.get_user_count().await, 0);
    assert_eq!(registry.get_user_stats().await, db::UserStats::default());

    let td = tempfile::tempdir().unwrap();
    assert!(!registry.export_users(&td.path().join("out.csv")).await);
}

#[tokio::test]
async fn export_lists_every_user_newest_first() {
    let registry = setup_registry().await;
    for (id, name) in [(1, "Ana"), (2, "Bo"), (3, "Cy"), (4, "Di")] {
        registry.add_user(id, Some(name), Some(&name.to_lowercase())).await;
    }
    backdate(&registry, 1, "2024-01-01 00:00:00.000").await;
    backdate(&registry, 2, "2024-03-01 00:00:00.000").await;
    backdate(&registry, 3, "2024-02-01 00:00:00.000").await;

    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("users_export.csv");
    assert!(registry.export_users(&path).await);

    let content = std::fs::read_to_string(&path).unwrap();
    let mut lines = content.lines();
    assert_eq!(lines.next(), Some(CSV_HEADER));

    let rows: Vec<Vec<&str>> = lines.map(|l| l.split(',').collect()).collect();
    assert!(rows.iter().all(|r| r.len() == 4));

    let exported: Vec<i64> = rows.iter().map(|r| r[0].parse().unwrap()).collect();
    assert_eq!(exported, vec![4, 2, 3, 1]);

    let stored: HashSet<i64> = db::list_users_newest_first(registry.pool())
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.user_id)
        .collect();
    assert_eq!(exported.iter().copied().collect::<HashSet<_>>(), stored);

    let seen: Vec<&str> = rows.iter().map(|r| r[3]).collect();
    assert!(seen.windows(2).all(|w| w[0] >= w[1]));
    assert_eq!(rows[1], vec!["2", "Bo", "bo", "2024-03-01 00:00:00.000"]);
}
