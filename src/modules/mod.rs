//! Feature modules composed into the application.
//!
//! Each owns its tables and a thin set of routes; business rules live elsewhere.

pub mod documents;
pub mod installations;
pub mod loan_applications;
pub mod loan_schemes;
pub mod login_info;
pub mod resource;
pub mod users;

use crate::app::module::Module;
use std::sync::Arc;

pub use documents::DocumentModule;
pub use installations::InstallationModule;
pub use loan_applications::LoanApplicationModule;
pub use loan_schemes::LoanSchemeModule;
pub use login_info::LoginInfoModule;
pub use users::{UserModule, UserRole};

/// Every feature module in canonical registration order
pub fn all_modules() -> Vec<Arc<dyn Module>> {
    vec![
        Arc::new(UserModule),
        Arc::new(LoginInfoModule),
        Arc::new(LoanSchemeModule),
        Arc::new(LoanApplicationModule),
        Arc::new(DocumentModule),
        Arc::new(InstallationModule),
    ]
}
