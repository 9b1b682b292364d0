pub mod csv;

pub use crate::csv::{decisions_csv, render_csv, user_month_csv, users_csv};
