//! Connection opening and one-time per-connection setup.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use common::models::SqlValue;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, LoadExtensionGuard, OpenFlags};

use crate::database::Database;

/// Body of a custom scalar SQL function.
pub type ScalarFn = Arc<dyn Fn(&[SqlValue]) -> Result<SqlValue, String> + Send + Sync>;

/// A scalar function registered on every connection.
#[derive(Clone)]
pub struct SqlFunction {
    pub name: String,
    /// Number of arguments, or -1 for variadic.
    pub num_args: i32,
    pub func: ScalarFn,
}

impl SqlFunction {
    pub fn new<F>(name: impl Into<String>, num_args: i32, func: F) -> Self
    where
        F: Fn(&[SqlValue]) -> Result<SqlValue, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            num_args,
            func: Arc::new(func),
        }
    }
}

impl std::fmt::Debug for SqlFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlFunction")
            .field("name", &self.name)
            .field("num_args", &self.num_args)
            .finish()
    }
}

/// Extra configuration applied to each freshly opened connection.
pub trait ConnectionHook: Send + Sync {
    fn prepare(&self, conn: &Connection, database: &str) -> rusqlite::Result<()>;
}

/// Everything needed to open a configured connection.
///
/// Shared by all workers; each worker calls [`ConnectionSetup::open`] once
/// per database the first time it touches it.
#[derive(Clone, Default)]
pub struct ConnectionSetup {
    pub functions: Vec<SqlFunction>,
    pub extensions: Vec<PathBuf>,
    /// Page cache size in KiB; 0 keeps the engine default.
    pub cache_size_kb: u64,
    pub hooks: Vec<Arc<dyn ConnectionHook>>,
}

impl ConnectionSetup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function(mut self, function: SqlFunction) -> Self {
        self.functions.push(function);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn ConnectionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Opens a read-only connection to `db` and prepares it.
    pub fn open(&self, db: &Database) -> rusqlite::Result<Connection> {
        let conn = match db.path() {
            None => Connection::open_in_memory()?,
            Some(path) => {
                let mode = if db.is_mutable() { "mode=ro" } else { "immutable=1" };
                let uri = format!("file:{}?{}", uri_path(&path.to_string_lossy()), mode);
                Connection::open_with_flags(
                    uri,
                    OpenFlags::SQLITE_OPEN_READ_ONLY
                        | OpenFlags::SQLITE_OPEN_URI
                        | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?
            }
        };
        self.prepare(&conn, db.name())?;
        tracing::debug!(database = %db.name(), "Connection opened");
        Ok(conn)
    }

    /// Applies functions, extensions, cache size and hooks, in that order.
    pub fn prepare(&self, conn: &Connection, database: &str) -> rusqlite::Result<()> {
        for function in &self.functions {
            register_function(conn, function)?;
        }
        if !self.extensions.is_empty() {
            // SAFETY: extension paths come from operator configuration, and
            // the guard disables loading again once these are in.
            unsafe {
                let _guard = LoadExtensionGuard::new(conn)?;
                for path in &self.extensions {
                    conn.load_extension(path, None::<&str>)?;
                }
            }
        }
        if self.cache_size_kb > 0 {
            conn.execute_batch(&format!("PRAGMA cache_size = -{}", self.cache_size_kb))?;
        }
        for hook in &self.hooks {
            hook.prepare(conn, database)?;
        }
        Ok(())
    }
}

fn register_function(conn: &Connection, function: &SqlFunction) -> rusqlite::Result<()> {
    let func = AssertUnwindSafe(function.func.clone());
    conn.create_scalar_function(
        function.name.as_str(),
        function.num_args,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let call: &ScalarFn = &func;
            let args: Vec<SqlValue> = (0..ctx.len())
                .map(|i| SqlValue::from_value_ref(ctx.get_raw(i)))
                .collect();
            call(&args).map_err(|message| rusqlite::Error::UserFunctionError(message.into()))
        },
    )
}

/// Escapes the characters SQLite treats specially in a `file:` URI path.
fn uri_path(path: &str) -> String {
    path.replace('%', "%25").replace('?', "%3f").replace('#', "%23")
}
