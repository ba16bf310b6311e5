use chronicle_db::Db;
use rusqlite_migration::{Migrations, M};
use serde::{Deserialize, Serialize};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let migrations = Migrations::new(vec![M::up(
        "
        CREATE TABLE Account (id TEXT PRIMARY KEY, name TEXT NOT NULL, owner TEXT);
        CREATE TABLE Todo (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            title TEXT NOT NULL,
            done BOOL NOT NULL,
            FOREIGN KEY (account_id) REFERENCES Account(id)
        );",
    )]);

    let db = Db::open_memory()?;
    db.migrate(&migrations)?;

    let alice = db.with_author("alice");
    let bob = db.with_author("bob");

    let mut account = alice.save(&Account {
        name: "Globex".to_string(),
        ..Default::default()
    })?;

    account.owner = Some("bob".to_string());
    account = bob.save(&account)?;

    bob.transaction(|txn| {
        txn.save(&Todo {
            account_id: account.id.clone(),
            title: "Call Globex about renewal".to_string(),
            ..Default::default()
        })
    })?;

    for version in db.history().versions(&account, &account.id)? {
        println!(
            "v{} by {} at {}{}: {:?}",
            version.version,
            version.author,
            version.created,
            if version.is_current_version { " (current)" } else { "" },
            version.entity,
        );
    }

    Ok(())
}

#[derive(Serialize, Deserialize, Default, Debug)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub owner: Option<String>,
}

#[derive(Serialize, Deserialize, Default, Debug)]
pub struct Todo {
    pub id: String,
    pub account_id: String,
    pub title: String,
    pub done: bool,
}
