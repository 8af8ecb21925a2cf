/*
 * This file is a part of a Skytable-derived project.
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! # kvd
//!
//! An in-memory key-value server: strings, lists, streams and sorted
//! sets behind a RESP-like wire protocol, with blocking list/stream ops,
//! transactions, pub/sub and single-primary replication.

use kvd::config::{self, Role};
use kvd::db::Db;
use kvd::listener::Server;
use kvd::{dispatch, rdb, replication};
use libsky::util::terminal;
use libsky::{URL, VERSION};
use std::env;
use std::process;
use std::sync::Arc;

#[cfg(not(target_env = "msvc"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn main() {
    env_logger::Builder::new()
        .parse_filters(&env::var("KVD_LOG").unwrap_or_else(|_| "info".to_owned()))
        .init();

    let cfg = match config::parse_args(env::args()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };
    println!("kvd v{VERSION} | {URL}");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("kvd-worker")
        .enable_all()
        .build()
        .expect("failed to start the tokio runtime");

    let db = Db::new(cfg);
    runtime.block_on(run(db.clone()));
    drop(runtime);

    assert_eq!(
        Arc::strong_count(&db.shared),
        1,
        "a background task outlived server shutdown and is still holding a Db handle"
    );
    terminal::write_info("Goodbye :)\n").unwrap();
}

async fn run(db: Db) {
    dispatch::load_snapshot(&db);

    if let Some(rx) = db.shared.repl.take_propagation_receiver() {
        let repl_db = db.clone();
        tokio::spawn(async move {
            repl_db.shared.repl.run_propagation_loop(rx).await;
        });
    }

    if let Some((host, port)) = db.shared.config.replicaof.clone() {
        let replica_db = db.clone();
        tokio::spawn(async move {
            if let Err(e) = replication::replica::run(replica_db, host, port).await {
                log::error!("replication link to primary failed: {e}");
            }
        });
    }

    let server = match Server::bind(db.clone()).await {
        Ok(s) => s,
        Err(e) => {
            log::error!("{e}");
            process::exit(1);
        }
    };
    log::info!(
        "kvd listening on port {} as {}",
        server.local_port(),
        match db.shared.config.role() {
            Role::Primary => "primary",
            Role::Replica => "replica",
        }
    );

    let shutdown_tx = server.shutdown_sender();
    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("received shutdown signal");
        let _ = shutdown_tx.send(());
    });
    let recv = Box::pin(async move {
        let _ = shutdown_rx.recv().await;
    });
    server.run(recv).await;

    let path = std::path::Path::new(&db.shared.config.dir).join(&db.shared.config.dbfilename);
    let snapshot = rdb::dump(&db.shared.store);
    if let Err(e) = std::fs::write(&path, &snapshot) {
        log::error!("failed to write snapshot to {}: {e}", path.display());
    } else {
        log::info!("wrote snapshot to {}", path.display());
    }
}
