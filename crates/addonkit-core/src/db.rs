//! SQLite-backed store of installed packages for one profile.

use crate::config::DatabaseConfig;
use crate::models::{Defn, Pkg, PkgDep, PkgFolder, PkgOptions};
use crate::{AddonkitError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Installed-package database.
///
/// The connection is owned until [`PkgDatabase::close`] is called; every
/// call after that fails with a database error.
pub struct PkgDatabase {
    conn: Mutex<Option<Connection>>,
}

impl PkgDatabase {
    /// Open the database at `db_path`, creating it and its parent if needed.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AddonkitError::io_with_path(e, parent))?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL;\n\
             PRAGMA busy_timeout={};\n\
             PRAGMA synchronous=NORMAL;",
            DatabaseConfig::BUSY_TIMEOUT_MS,
        ))?;
        Self::from_connection(conn)
    }

    /// An in-memory database, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pkg (
                source TEXT NOT NULL,
                id TEXT NOT NULL,
                slug TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                url TEXT NOT NULL,
                download_url TEXT NOT NULL,
                date_published TEXT NOT NULL,
                version TEXT NOT NULL,
                changelog_url TEXT NOT NULL,
                PRIMARY KEY (source, id)
            );

            CREATE TABLE IF NOT EXISTS pkg_options (
                any_flavour INTEGER NOT NULL,
                any_release_type INTEGER NOT NULL,
                version_eq INTEGER NOT NULL,
                pkg_source TEXT NOT NULL,
                pkg_id TEXT NOT NULL,
                PRIMARY KEY (pkg_source, pkg_id),
                FOREIGN KEY (pkg_source, pkg_id) REFERENCES pkg (source, id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS pkg_folder (
                name TEXT NOT NULL PRIMARY KEY,
                pkg_source TEXT NOT NULL,
                pkg_id TEXT NOT NULL,
                FOREIGN KEY (pkg_source, pkg_id) REFERENCES pkg (source, id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS pkg_dep (
                id TEXT NOT NULL,
                pkg_source TEXT NOT NULL,
                pkg_id TEXT NOT NULL,
                PRIMARY KEY (id, pkg_source, pkg_id),
                FOREIGN KEY (pkg_source, pkg_id) REFERENCES pkg (source, id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS pkg_version_log (
                version TEXT NOT NULL,
                install_time TEXT NOT NULL,
                pkg_source TEXT NOT NULL,
                pkg_id TEXT NOT NULL,
                PRIMARY KEY (version, pkg_source, pkg_id)
            );",
        )?;
        Ok(())
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn.lock().map_err(|_| AddonkitError::Database {
            message: "Failed to acquire database connection lock".to_string(),
            source: None,
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.lock_conn()?;
        let conn = guard.as_mut().ok_or_else(|| AddonkitError::Database {
            message: "Database is closed".to_string(),
            source: None,
        })?;
        f(conn)
    }

    /// Release the connection. Idempotent.
    pub fn close(&self) -> Result<()> {
        if let Some(conn) = self.lock_conn()?.take() {
            conn.close().map_err(|(_, e)| AddonkitError::from(e))?;
            debug!("Closed package database");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.lock_conn().map(|c| c.is_none()).unwrap_or(true)
    }

    // ========================================
    // Queries
    // ========================================

    /// Installed package matching a definition by id, alias or slug.
    pub fn get_pkg(&self, defn: &Defn) -> Result<Option<Pkg>> {
        self.with_conn(|conn| {
            let key: Option<(String, String)> = conn
                .query_row(
                    "SELECT source, id FROM pkg
                     WHERE source = ?1 AND (id = ?2 OR id = ?3 OR lower(slug) = lower(?3))
                     ORDER BY id = ?2 DESC, id = ?3 DESC
                     LIMIT 1",
                    params![defn.source, defn.id.as_deref().unwrap_or(""), defn.alias],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            match key {
                Some((source, id)) => load_pkg(conn, &source, &id),
                None => Ok(None),
            }
        })
    }

    pub fn get_by_id(&self, source: &str, id: &str) -> Result<Option<Pkg>> {
        self.with_conn(|conn| load_pkg(conn, source, id))
    }

    /// Every installed package, ordered by case-folded name.
    pub fn installed(&self) -> Result<Vec<Pkg>> {
        self.with_conn(|conn| {
            let keys: Vec<(String, String)> = conn
                .prepare("SELECT source, id FROM pkg ORDER BY lower(name), source, id")?
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<_, _>>()?;
            let mut pkgs = Vec::with_capacity(keys.len());
            for (source, id) in keys {
                if let Some(pkg) = load_pkg(conn, &source, &id)? {
                    pkgs.push(pkg);
                }
            }
            Ok(pkgs)
        })
    }

    /// Installed packages owning any of `folders`.
    pub fn folder_conflicts(&self, folders: &BTreeSet<String>) -> Result<Vec<Pkg>> {
        self.with_conn(|conn| {
            let mut owners: BTreeSet<(String, String)> = BTreeSet::new();
            let mut stmt =
                conn.prepare("SELECT pkg_source, pkg_id FROM pkg_folder WHERE name = ?1")?;
            for folder in folders {
                let rows = stmt.query_map(params![folder], |row| Ok((row.get(0)?, row.get(1)?)))?;
                for row in rows {
                    owners.insert(row?);
                }
            }
            drop(stmt);
            let mut pkgs = Vec::new();
            for (source, id) in owners {
                if let Some(pkg) = load_pkg(conn, &source, &id)? {
                    pkgs.push(pkg);
                }
            }
            Ok(pkgs)
        })
    }

    /// Names of all folders owned by installed packages.
    pub fn tracked_folder_names(&self) -> Result<HashSet<String>> {
        self.with_conn(|conn| {
            let names = conn
                .prepare("SELECT name FROM pkg_folder")?
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;
            Ok(names)
        })
    }

    /// Versions previously installed for a package, oldest first.
    pub fn version_log(&self, source: &str, id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let versions = conn
                .prepare(
                    "SELECT version FROM pkg_version_log
                     WHERE pkg_source = ?1 AND pkg_id = ?2 ORDER BY install_time, rowid",
                )?
                .query_map(params![source, id], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;
            Ok(versions)
        })
    }

    // ========================================
    // Mutations
    // ========================================

    /// Insert a package with its options, folders and dependencies.
    pub fn insert(&self, pkg: &Pkg) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO pkg (source, id, slug, name, description, url, download_url,
                                  date_published, version, changelog_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    pkg.source,
                    pkg.id,
                    pkg.slug,
                    pkg.name,
                    pkg.description,
                    pkg.url,
                    pkg.download_url,
                    pkg.date_published.to_rfc3339(),
                    pkg.version,
                    pkg.changelog_url,
                ],
            )?;
            tx.execute(
                "INSERT INTO pkg_options (any_flavour, any_release_type, version_eq, pkg_source, pkg_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    pkg.options.any_flavour,
                    pkg.options.any_release_type,
                    pkg.options.version_eq,
                    pkg.source,
                    pkg.id,
                ],
            )?;
            for folder in &pkg.folders {
                tx.execute(
                    "INSERT INTO pkg_folder (name, pkg_source, pkg_id) VALUES (?1, ?2, ?3)",
                    params![folder.name, pkg.source, pkg.id],
                )?;
            }
            for dep in &pkg.deps {
                tx.execute(
                    "INSERT OR IGNORE INTO pkg_dep (id, pkg_source, pkg_id) VALUES (?1, ?2, ?3)",
                    params![dep.id, pkg.source, pkg.id],
                )?;
            }
            tx.execute(
                "INSERT OR IGNORE INTO pkg_version_log (version, install_time, pkg_source, pkg_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    pkg.version,
                    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
                    pkg.source,
                    pkg.id
                ],
            )?;
            tx.commit()?;
            debug!("Inserted {}:{} {}", pkg.source, pkg.id, pkg.version);
            Ok(())
        })
    }

    /// Delete a package; options, folders and dependencies cascade.
    pub fn delete(&self, pkg: &Pkg) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM pkg WHERE source = ?1 AND id = ?2",
                params![pkg.source, pkg.id],
            )?;
            Ok(())
        })
    }

    /// Set or clear the version pin of an installed package.
    pub fn set_version_eq(&self, pkg: &Pkg, pinned: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE pkg_options SET version_eq = ?1 WHERE pkg_source = ?2 AND pkg_id = ?3",
                params![pinned, pkg.source, pkg.id],
            )?;
            Ok(())
        })
    }
}

fn load_pkg(conn: &Connection, source: &str, id: &str) -> Result<Option<Pkg>> {
    let pkg = conn
        .query_row(
            "SELECT p.source, p.id, p.slug, p.name, p.description, p.url, p.download_url,
                    p.date_published, p.version, p.changelog_url,
                    o.any_flavour, o.any_release_type, o.version_eq
             FROM pkg p
             LEFT JOIN pkg_options o ON o.pkg_source = p.source AND o.pkg_id = p.id
             WHERE p.source = ?1 AND p.id = ?2",
            params![source, id],
            pkg_from_row,
        )
        .optional()?;
    let Some(mut pkg) = pkg else {
        return Ok(None);
    };

    pkg.folders = conn
        .prepare("SELECT name FROM pkg_folder WHERE pkg_source = ?1 AND pkg_id = ?2 ORDER BY name")?
        .query_map(params![source, id], |row| Ok(PkgFolder { name: row.get(0)? }))?
        .collect::<std::result::Result<_, _>>()?;
    pkg.deps = conn
        .prepare("SELECT id FROM pkg_dep WHERE pkg_source = ?1 AND pkg_id = ?2 ORDER BY id")?
        .query_map(params![source, id], |row| Ok(PkgDep { id: row.get(0)? }))?
        .collect::<std::result::Result<_, _>>()?;
    Ok(Some(pkg))
}

fn pkg_from_row(row: &Row<'_>) -> rusqlite::Result<Pkg> {
    let date_published: String = row.get(7)?;
    let date_published = DateTime::parse_from_rfc3339(&date_published)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(Pkg {
        source: row.get(0)?,
        id: row.get(1)?,
        slug: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        url: row.get(5)?,
        download_url: row.get(6)?,
        date_published,
        version: row.get(8)?,
        changelog_url: row.get(9)?,
        options: PkgOptions {
            any_flavour: row.get::<_, Option<bool>>(10)?.unwrap_or(false),
            any_release_type: row.get::<_, Option<bool>>(11)?.unwrap_or(false),
            version_eq: row.get::<_, Option<bool>>(12)?.unwrap_or(false),
        },
        folders: Vec::new(),
        deps: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::sample_pkg;
    use tempfile::TempDir;

    #[test]
    fn test_insert_and_lookup() {
        let db = PkgDatabase::open_in_memory().unwrap();
        let mut pkg = sample_pkg("github", "Owner/Foo", "1.0");
        pkg.deps.push(PkgDep { id: "Owner/Lib".into() });
        db.insert(&pkg).unwrap();

        assert_eq!(db.get_pkg(&Defn::new("github", "owner/foo")).unwrap(), Some(pkg.clone()));
        assert_eq!(db.get_pkg(&Defn::new("github", "Owner/Foo")).unwrap(), Some(pkg.clone()));
        assert!(db.get_pkg(&Defn::new("wowi", "owner/foo")).unwrap().is_none());
        assert_eq!(db.version_log("github", "Owner/Foo").unwrap(), vec!["1.0"]);
    }

    #[test]
    fn test_installed_ordered_by_name() {
        let db = PkgDatabase::open_in_memory().unwrap();
        db.insert(&sample_pkg("wowi", "zeta", "1")).unwrap();
        db.insert(&sample_pkg("wowi", "Alpha", "1")).unwrap();
        let names: Vec<_> = db.installed().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Alpha", "zeta"]);
    }

    #[test]
    fn test_delete_cascades_folders() {
        let db = PkgDatabase::open_in_memory().unwrap();
        let pkg = sample_pkg("wowi", "Foo", "1");
        db.insert(&pkg).unwrap();
        assert!(db.tracked_folder_names().unwrap().contains("Foo"));

        let folders: BTreeSet<String> = ["Foo".to_string(), "Bar".to_string()].into();
        assert_eq!(db.folder_conflicts(&folders).unwrap(), vec![pkg.clone()]);

        db.delete(&pkg).unwrap();
        assert!(db.tracked_folder_names().unwrap().is_empty());
        assert!(db.folder_conflicts(&folders).unwrap().is_empty());
    }

    #[test]
    fn test_set_version_eq() {
        let db = PkgDatabase::open_in_memory().unwrap();
        let pkg = sample_pkg("wowi", "Foo", "1");
        db.insert(&pkg).unwrap();
        db.set_version_eq(&pkg, true).unwrap();
        assert!(db.get_by_id("wowi", "Foo").unwrap().unwrap().is_pinned());
    }

    #[test]
    fn test_close_rejects_further_use() {
        let temp = TempDir::new().unwrap();
        let db = PkgDatabase::open(&temp.path().join("profile").join("db.sqlite")).unwrap();
        db.close().unwrap();
        db.close().unwrap();
        assert!(db.is_closed());
        assert!(db.installed().is_err());
    }
}
