pub mod db;
pub mod push;

pub use db::{seed_pass, seed_registration, TestDb};
pub use push::RecordingPush;
