use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};
use tempfile::NamedTempFile;

/// Test database with automatic cleanup
pub struct TestDb {
    connection: DatabaseConnection,
    _temp_file: NamedTempFile,
}

impl TestDb {
    /// Create a new test database with migrations applied
    pub async fn new() -> Self {
        // Create temporary SQLite database file
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp file path");
        let db_url = format!("sqlite://{}?mode=rwc", db_path);

        // Connect to database
        let connection = Database::connect(&db_url)
            .await
            .expect("Failed to connect to test database");

        // Run migrations
        migration::Migrator::up(&connection, None)
            .await
            .expect("Failed to run migrations");

        Self {
            connection,
            _temp_file: temp_file,
        }
    }

    /// Get database connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

/// Create a pass with a fixed authentication token for testing
pub async fn seed_pass(
    db: &DatabaseConnection,
    pass_type: &str,
    serial: &str,
    auth_token: &str,
) -> passrelay::storage::Pass {
    passrelay::storage::create_pass(db, pass_type, serial, Some(auth_token))
        .await
        .expect("Failed to create test pass")
}

/// Register a device for a pass
pub async fn seed_registration(
    db: &DatabaseConnection,
    device_id: &str,
    pass_type: &str,
    serial: &str,
    push_token: &str,
) {
    passrelay::storage::register_device(db, device_id, pass_type, serial, push_token)
        .await
        .expect("Failed to register test device");
}
