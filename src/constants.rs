/// Table names shared by the feature modules, the foreign key declarations and the reset utility
// Base table for every account; role tables share its ids
pub const USERS_TABLE: &str = "users";
pub const ADMINS_TABLE: &str = "admins";
pub const CUSTOMERS_TABLE: &str = "customers";
pub const LOAN_OFFICERS_TABLE: &str = "loan_officers";
pub const LOGIN_INFO_TABLE: &str = "login_info";
pub const LOAN_SCHEMES_TABLE: &str = "loan_schemes";
pub const LOAN_APPLICATIONS_TABLE: &str = "loan_applications";
pub const DOCUMENTS_TABLE: &str = "documents";
pub const INSTALLATIONS_TABLE: &str = "installations";

/// Every table the application knows about, parents before children
pub const ALL_TABLES: &[&str] = &[
    USERS_TABLE,
    ADMINS_TABLE,
    CUSTOMERS_TABLE,
    LOAN_OFFICERS_TABLE,
    LOGIN_INFO_TABLE,
    LOAN_SCHEMES_TABLE,
    LOAN_APPLICATIONS_TABLE,
    DOCUMENTS_TABLE,
    INSTALLATIONS_TABLE,
];

pub const DEFAULT_API_PREFIX: &str = "/api/v1/loan-app";
pub const DEFAULT_DATABASE_PATH: &str = "LoanManagementSystem.db";

pub const TOTAL_COUNT_HEADER: &str = "x-total-count";
pub const TOKEN_HEADER: &str = "token";
