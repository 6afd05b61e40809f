pub mod account;
pub mod amount;
pub mod category;
pub mod currency;
pub mod datetime;
pub mod tag;
pub mod transaction;
pub mod user;

pub use account::Account;
pub use amount::{format_amount, parse_amount, AmountError};
pub use category::{Category, CategoryType};
pub use tag::Tag;
pub use transaction::{Transaction, TransactionType};
pub use user::User;
