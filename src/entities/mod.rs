pub mod job_execution;
pub mod pass;
pub mod registration;

pub use job_execution::Entity as JobExecution;
pub use pass::Entity as Pass;
pub use registration::Entity as Registration;
