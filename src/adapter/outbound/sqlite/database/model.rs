//! Database model types for Diesel ORM.

use diesel::prelude::*;

use super::schema::rows;

/// A versioned row as stored.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = rows)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RowRecord {
    pub kind: String,
    pub id: String,
    pub version: i64,
    pub body: String,
    pub updated_at: String,
}
