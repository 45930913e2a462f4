use sqlx::PgPool;

/// Connect, migrate, verify the session tables exist and start empty.
#[sqlx::test(migrations = "../../db/migrations")]
async fn test_full_bootstrap(pool: PgPool) {
    sessionstate_db::health_check(&pool).await.unwrap();

    for table in ["session_applications", "session_states", "session_cleanup"] {
        let count: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&pool)
            .await
            .unwrap_or_else(|e| panic!("{table} query failed: {e}"));
        assert_eq!(count.0, 0, "{table} should start empty");
    }
}
