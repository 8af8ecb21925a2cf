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

//! Command dispatch: name lookup, arity/type checks, `MULTI`/`EXEC`
//! queueing, and the inner-lock pattern that lets `EXEC` run a whole
//! batch under one store guard.
//!
//! Blocking commands (`BLPOP`, `XREAD ... BLOCK`) never actually block
//! when queued inside a transaction — real blocking only happens at the
//! top level, where no guard is already held. This sidesteps a reentrant
//! lock: `parking_lot::RwLock` is not reentrant, and `EXEC` already holds
//! the write guard its queued commands run under.

pub mod commands;

use crate::config::Role;
use crate::db::Db;
use crate::protocol::Reply;
use crate::session::Session;
use crate::store::stream::{parse_id_spec, parse_range_bound, StreamEntry, StreamId};
use crate::store::{Keyspace, StoreError};
use crate::wait::stream_wait::StreamController;
use crate::{rdb, wait};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

fn store_err_to_reply(e: StoreError) -> Reply {
    match e {
        StoreError::WrongType => Reply::wrong_type(),
        other => Reply::err(other.to_string()),
    }
}

fn arg_str(arg: &Bytes) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(arg)
}

fn upper(arg: &Bytes) -> String {
    arg_str(arg).to_ascii_uppercase()
}

/// Top-level entry point for one client-issued command. Handles `MULTI`
/// queueing, then either runs the command immediately (acquiring the
/// store lock itself) or, for `EXEC`, runs every queued command under one
/// guard. Returns the reply to send and whether a write actually
/// mutated the store (used by the caller to decide replica propagation).
pub async fn dispatch(db: &Db, session: &mut Session, args: Vec<Bytes>) -> (Reply, bool) {
    if args.is_empty() {
        return (Reply::err("empty command"), false);
    }
    let name = upper(&args[0]);
    let Some(info) = commands::lookup(&name) else {
        return (Reply::err(format!("unknown command '{name}'")), false);
    };
    if args.len() < info.min_arity {
        return (Reply::err(format!("wrong number of arguments for '{name}' command")), false);
    }

    if session.in_transaction && name != "EXEC" && name != "DISCARD" && name != "MULTI" {
        session.queued.push(args);
        return (Reply::Simple("QUEUED".into()), false);
    }

    match name.as_str() {
        "MULTI" => {
            if session.in_transaction {
                (Reply::err("MULTI calls can not be nested"), false)
            } else {
                session.in_transaction = true;
                (Reply::Ok, false)
            }
        }
        "DISCARD" => {
            if !session.in_transaction {
                (Reply::err("DISCARD without MULTI"), false)
            } else {
                session.in_transaction = false;
                session.queued.clear();
                (Reply::Ok, false)
            }
        }
        "EXEC" => {
            if !session.in_transaction {
                return (Reply::err("EXEC without MULTI"), false);
            }
            session.in_transaction = false;
            let queued = std::mem::take(&mut session.queued);
            let mut replies = Vec::with_capacity(queued.len());
            let mut any_write = false;
            {
                let mut guard = db.shared.store.write();
                for cmd_args in queued {
                    let cmd_name = upper(&cmd_args[0]);
                    // Arity was already checked when the command was queued; only
                    // re-confirm it's still a known command.
                    if commands::lookup(&cmd_name).is_none() {
                        replies.push(Reply::err(format!("unknown command '{cmd_name}'")));
                        continue;
                    }
                    let (reply, wrote) = execute_locked(db, session, &cmd_name, &cmd_args, &mut guard);
                    if wrote {
                        any_write = true;
                        drop_and_propagate(db, &cmd_args);
                    }
                    replies.push(reply);
                }
            }
            (Reply::Array(replies), any_write)
        }
        _ => {
            let (reply, wrote) = execute_top_level(db, session, &name, &args).await;
            if wrote {
                drop_and_propagate(db, &args);
            }
            (reply, wrote)
        }
    }
}

/// Hands a write command's original frame to the ordered propagation
/// queue, if this node is a primary (a replica never re-propagates what
/// it applies from its own upstream). Synchronous and non-blocking: the
/// actual socket writes happen on the single background drain task
/// (`ReplicationState::run_propagation_loop`), but the offset bump and
/// the enqueue itself happen here, immediately, so ordering and offset
/// visibility don't depend on task scheduling.
fn drop_and_propagate(db: &Db, args: &[Bytes]) {
    if db.shared.config.role() != Role::Primary {
        return;
    }
    let frame = crate::protocol::encode_command(&args.iter().map(|b| b.as_ref()).collect::<Vec<_>>());
    db.shared.repl.enqueue_propagation(frame);
}

/// Runs a command that does not need to block or otherwise `.await`,
/// under a guard the caller already holds (`EXEC`). Returns the reply and
/// whether the store was mutated.
fn execute_locked(db: &Db, session: &mut Session, name: &str, args: &[Bytes], ks: &mut Keyspace) -> (Reply, bool) {
    sync_dispatch(session, name, args, ks, Some(db))
}

/// Runs a command at the top level: synchronous commands acquire the
/// store lock themselves; blocking/async commands (`BLPOP`, `XREAD
/// BLOCK`, `WAIT`, `SUBSCRIBE`, `PUBLISH`, `PSYNC`) are handled here.
async fn execute_top_level(db: &Db, session: &mut Session, name: &str, args: &[Bytes]) -> (Reply, bool) {
    match name {
        "BLPOP" => {
            let keys: Vec<Bytes> = args[1..args.len() - 1].to_vec();
            let timeout_secs: f64 = match arg_str(&args[args.len() - 1]).parse() {
                Ok(v) => v,
                Err(_) => return (Reply::err("timeout is not a float or out of range"), false),
            };
            let timeout = if timeout_secs <= 0.0 {
                None
            } else {
                Some(Duration::from_secs_f64(timeout_secs))
            };
            match wait::list::blpop(&db.shared.store, &db.shared.list_wait, &keys, timeout).await {
                Ok(Some((key, item))) => (
                    Reply::Array(vec![Reply::bulk(key), Reply::bulk(item)]),
                    true,
                ),
                Ok(None) => (Reply::NullArray, false),
                Err(e) => (store_err_to_reply(e), false),
            }
        }
        "XREAD" => execute_xread(db, args).await,
        "WAIT" => {
            let num_replicas: usize = match arg_str(&args[1]).parse() {
                Ok(v) => v,
                Err(_) => return (Reply::err("value is not an integer or out of range"), false),
            };
            let timeout_ms: u64 = match arg_str(&args[2]).parse() {
                Ok(v) => v,
                Err(_) => return (Reply::err("timeout is not an integer or out of range"), false),
            };
            let required = db.shared.repl.offset();
            let reached = db
                .shared
                .repl
                .wait_for_acks(required, num_replicas, Duration::from_millis(timeout_ms))
                .await;
            (Reply::Integer(reached as i64), false)
        }
        "SUBSCRIBE" => {
            let channel = Bytes::copy_from_slice(&args[1]);
            db.shared.pubsub.subscribe(channel.clone(), session.id, &session.write_half);
            session.subscribed.insert(channel.clone());
            (
                Reply::Array(vec![
                    Reply::bulk("subscribe"),
                    Reply::bulk(channel),
                    Reply::Integer(session.subscribed.len() as i64),
                ]),
                false,
            )
        }
        "UNSUBSCRIBE" => {
            if args.len() > 1 {
                let channel = Bytes::copy_from_slice(&args[1]);
                db.shared.pubsub.unsubscribe(&channel, session.id);
                session.subscribed.remove(&channel);
            } else {
                db.shared.pubsub.unsubscribe_all(session.id);
                session.subscribed.clear();
            }
            (Reply::Ok, false)
        }
        "PUBLISH" => {
            let count = db.shared.pubsub.publish(&args[1], &args[2]).await;
            (Reply::Integer(count), false)
        }
        "PSYNC" => match crate::replication::primary::handle_psync(
            &db.shared.repl,
            &db.shared.store,
            session.write_half.clone(),
        )
        .await
        {
            Ok(handle) => {
                session.replica_handle = Some(handle);
                (Reply::None, false) // reply already written raw by handle_psync
            }
            Err(_) => (Reply::err("replication handshake failed"), false),
        },
        _ => {
            let mut guard = db.shared.store.write();
            sync_dispatch(session, name, args, &mut guard, Some(db))
        }
    }
}

struct XreadArgs {
    keys: Vec<Bytes>,
    thresholds: Vec<StreamId>,
    count: Option<usize>,
    block_ms: Option<u64>,
}

/// Parses `[COUNT n] [BLOCK ms] STREAMS key [key ...] id [id ...]`,
/// resolving any `$` id against `ks`'s current state. Shared by the
/// top-level (possibly blocking) path and the non-blocking path used
/// when `XREAD` is queued inside a transaction.
fn parse_xread_args(ks: &mut Keyspace, args: &[Bytes]) -> Result<XreadArgs, Reply> {
    let mut idx = 1;
    let mut block_ms = None;
    let mut count = None;
    while idx < args.len() {
        match upper(&args[idx]).as_str() {
            "BLOCK" => {
                block_ms = arg_str(&args[idx + 1]).parse().ok();
                idx += 2;
            }
            "COUNT" => {
                count = arg_str(&args[idx + 1]).parse().ok();
                idx += 2;
            }
            "STREAMS" => {
                idx += 1;
                break;
            }
            _ => return Err(Reply::err("syntax error")),
        }
    }
    let rest = &args[idx..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(Reply::err("Unbalanced XREAD list of streams"));
    }
    let n = rest.len() / 2;
    let keys: Vec<Bytes> = rest[..n].to_vec();
    let id_args = &rest[n..];

    let mut thresholds = Vec::with_capacity(n);
    for (key, id_arg) in keys.iter().zip(id_args.iter()) {
        let s = arg_str(id_arg);
        let threshold = if s.as_ref() == "$" {
            ks.xread_last_id(key)
        } else {
            match parse_range_bound(&s, true) {
                Some(id) => id,
                None => return Err(Reply::err("Invalid stream ID specified as stream command argument")),
            }
        };
        thresholds.push(threshold);
    }
    Ok(XreadArgs { keys, thresholds, count, block_ms })
}

fn xread_probe(ks: &mut Keyspace, keys: &[Bytes], thresholds: &[StreamId], count: Option<usize>) -> Vec<(Bytes, Vec<StreamEntry>)> {
    let mut out = Vec::new();
    for (key, threshold) in keys.iter().zip(thresholds.iter()) {
        if let Ok(mut entries) = ks.xread_after(key, *threshold) {
            if let Some(c) = count {
                entries.truncate(c);
            }
            if !entries.is_empty() {
                out.push((key.clone(), entries));
            }
        }
    }
    out
}

/// Non-blocking `XREAD`, usable with an externally-held guard: any
/// `BLOCK` option is ignored, matching the rule that transactions never
/// actually block.
fn xread_locked(ks: &mut Keyspace, args: &[Bytes]) -> Reply {
    let parsed = match parse_xread_args(ks, args) {
        Ok(p) => p,
        Err(r) => return r,
    };
    let found = xread_probe(ks, &parsed.keys, &parsed.thresholds, parsed.count);
    xread_reply(found)
}

async fn execute_xread(db: &Db, args: &[Bytes]) -> (Reply, bool) {
    let controller = Arc::new(StreamController::default());
    // Parse, probe and (if nothing is there yet) register the waiter all
    // under one guard acquisition, so a concurrent XADD can't land between
    // the probe and the registration and go unnoticed.
    let (parsed, found, blocking) = {
        let mut ks = db.shared.store.write();
        let parsed = match parse_xread_args(&mut ks, args) {
            Ok(p) => p,
            Err(r) => return (r, false),
        };
        let found = xread_probe(&mut ks, &parsed.keys, &parsed.thresholds, parsed.count);
        let blocking = found.is_empty() && parsed.block_ms.is_some();
        if blocking {
            let regs: Vec<(Bytes, StreamId)> = parsed.keys.iter().cloned().zip(parsed.thresholds.iter().copied()).collect();
            db.shared.stream_wait.register(&regs, &controller);
        }
        (parsed, found, blocking)
    };
    if !blocking {
        return (xread_reply(found), false);
    }

    let timeout = match parsed.block_ms {
        Some(0) | None => None,
        Some(ms) => Some(Duration::from_millis(ms)),
    };
    wait::stream_wait::wait(&controller, timeout).await;
    db.shared.stream_wait.unregister(&parsed.keys, &controller);

    let found = xread_probe(&mut db.shared.store.write(), &parsed.keys, &parsed.thresholds, parsed.count);
    (xread_reply(found), false)
}

fn xread_reply(found: Vec<(Bytes, Vec<StreamEntry>)>) -> Reply {
    if found.is_empty() {
        return Reply::NullArray;
    }
    Reply::Array(
        found
            .into_iter()
            .map(|(key, entries)| {
                Reply::Array(vec![
                    Reply::bulk(key),
                    Reply::Array(
                        entries
                            .into_iter()
                            .map(|e| {
                                let mut fields = Vec::with_capacity(e.fields.len() * 2);
                                for (f, v) in e.fields {
                                    fields.push(Reply::bulk(f));
                                    fields.push(Reply::bulk(v));
                                }
                                Reply::Array(vec![Reply::bulk(e.id.to_string()), Reply::Array(fields)])
                            })
                            .collect(),
                    ),
                ])
            })
            .collect(),
    )
}

/// The synchronous command core: every command that never needs to
/// `.await`. Shared by the top-level path (which owns its own guard) and
/// the `EXEC` path (which reuses one guard across the whole batch).
fn sync_dispatch(session: &mut Session, name: &str, args: &[Bytes], ks: &mut Keyspace, db: Option<&Db>) -> (Reply, bool) {
    match name {
        "PING" => {
            if args.len() > 1 {
                (Reply::bulk(args[1].clone()), false)
            } else {
                (Reply::Simple("PONG".into()), false)
            }
        }
        "ECHO" => (Reply::bulk(args[1].clone()), false),
        "COMMAND" => (Reply::Array(vec![]), false),
        "CONFIG" => {
            if upper(&args[1]) != "GET" {
                return (Reply::err("only CONFIG GET is supported"), false);
            }
            let Some(db) = db else {
                return (Reply::err("CONFIG GET is not allowed inside MULTI"), false);
            };
            let param = arg_str(&args[2]).to_ascii_lowercase();
            let value = match param.as_str() {
                "dir" => Some(db.shared.config.dir.clone()),
                "dbfilename" => Some(db.shared.config.dbfilename.clone()),
                _ => None,
            };
            match value {
                Some(v) => (Reply::Array(vec![Reply::bulk(param), Reply::bulk(v)]), false),
                None => (Reply::Array(vec![]), false),
            }
        }
        "SET" => {
            let ttl_ms = parse_set_ttl(args);
            let ttl_ms = match ttl_ms {
                Ok(v) => v,
                Err(r) => return (r, false),
            };
            ks.set(Bytes::copy_from_slice(&args[1]), Bytes::copy_from_slice(&args[2]), ttl_ms);
            (Reply::Ok, true)
        }
        "GET" => match ks.get(&args[1]) {
            Ok(Some(v)) => (Reply::bulk(v), false),
            Ok(None) => (Reply::NullBulk, false),
            Err(e) => (store_err_to_reply(e), false),
        },
        "INCR" => match ks.incr(&args[1]) {
            Ok(v) => (Reply::Integer(v), true),
            Err(e) => (store_err_to_reply(e), false),
        },
        "DEL" => {
            let deleted = ks.del(&args[1]);
            (Reply::Integer(deleted as i64), deleted)
        }
        "EXISTS" => (Reply::Integer(ks.exists(&args[1]) as i64), false),
        "FLUSHALL" => {
            ks.flushall();
            (Reply::Ok, true)
        }
        "TYPE" => (Reply::Simple(ks.type_of(&args[1]).to_string()), false),
        "RPUSH" | "LPUSH" => {
            let front = name == "LPUSH";
            let Some(db) = db else {
                return (Reply::err("internal error: no registry available for push"), false);
            };
            let key = Bytes::copy_from_slice(&args[1]);
            let items: Vec<Bytes> = args[2..].iter().map(|b| Bytes::copy_from_slice(b)).collect();
            match wait::list::push_locked(ks, &db.shared.list_wait, &key, items, front) {
                Ok(len) => (Reply::Integer(len), true),
                Err(e) => (store_err_to_reply(e), false),
            }
        }
        "LRANGE" => {
            let (start, end) = match parse_two_ints(&args[2], &args[3]) {
                Ok(v) => v,
                Err(r) => return (r, false),
            };
            match ks.lrange(&args[1], start, end) {
                Ok(items) => (Reply::Array(items.into_iter().map(Reply::bulk).collect()), false),
                Err(e) => (store_err_to_reply(e), false),
            }
        }
        "LLEN" => match ks.llen(&args[1]) {
            Ok(n) => (Reply::Integer(n), false),
            Err(e) => (store_err_to_reply(e), false),
        },
        "LPOP" => {
            let n: usize = if args.len() > 2 {
                match arg_str(&args[2]).parse() {
                    Ok(v) => v,
                    Err(_) => return (Reply::err("value is not an integer or out of range"), false),
                }
            } else {
                1
            };
            match ks.lpop(&args[1], n) {
                Ok(items) => {
                    let wrote = !items.is_empty();
                    (Reply::Array(items.into_iter().map(Reply::bulk).collect()), wrote)
                }
                Err(e) => (store_err_to_reply(e), false),
            }
        }
        "BLPOP" => {
            // Queued inside MULTI: never blocks, just an immediate attempt.
            let keys: Vec<Bytes> = args[1..args.len() - 1].iter().map(|b| Bytes::copy_from_slice(b)).collect();
            match wait::list::try_pop_locked(ks, &keys) {
                Ok(Some((key, item))) => (Reply::Array(vec![Reply::bulk(key), Reply::bulk(item)]), true),
                Ok(None) => (Reply::NullArray, false),
                Err(e) => (store_err_to_reply(e), false),
            }
        }
        "XADD" => {
            let key = &args[1];
            let spec = match parse_id_spec(&arg_str(&args[2])) {
                Some(s) => s,
                None => return (Reply::err("Invalid stream ID specified as stream command argument"), false),
            };
            let mut fields = Vec::new();
            let mut i = 3;
            while i + 1 < args.len() {
                fields.push((Bytes::copy_from_slice(&args[i]), Bytes::copy_from_slice(&args[i + 1])));
                i += 2;
            }
            match ks.xadd(key, spec, fields) {
                Ok(id) => {
                    if let Some(db) = db {
                        db.shared.stream_wait.notify_added(&Bytes::copy_from_slice(key), id);
                    }
                    (Reply::bulk(id.to_string()), true)
                }
                Err(e) => (store_err_to_reply(e), false),
            }
        }
        "XREAD" => (xread_locked(ks, args), false),
        "XRANGE" => {
            let start = match parse_range_bound(&arg_str(&args[2]), true) {
                Some(v) => v,
                None => return (Reply::err("Invalid stream ID specified as stream command argument"), false),
            };
            let end = match parse_range_bound(&arg_str(&args[3]), false) {
                Some(v) => v,
                None => return (Reply::err("Invalid stream ID specified as stream command argument"), false),
            };
            match ks.xrange(&args[1], start, end) {
                Ok(entries) => (
                    Reply::Array(
                        entries
                            .into_iter()
                            .map(|e| {
                                let mut fields = Vec::with_capacity(e.fields.len() * 2);
                                for (f, v) in e.fields {
                                    fields.push(Reply::bulk(f));
                                    fields.push(Reply::bulk(v));
                                }
                                Reply::Array(vec![Reply::bulk(e.id.to_string()), Reply::Array(fields)])
                            })
                            .collect(),
                    ),
                    false,
                ),
                Err(e) => (store_err_to_reply(e), false),
            }
        }
        "ZADD" => {
            let score: f64 = match arg_str(&args[2]).parse::<f64>() {
                Ok(v) if v.is_finite() => v,
                _ => return (Reply::err("value is not a valid float"), false),
            };
            match ks.zadd(&args[1], Bytes::copy_from_slice(&args[3]), score) {
                Ok(is_new) => (Reply::Integer(is_new as i64), true),
                Err(e) => (store_err_to_reply(e), false),
            }
        }
        "ZRANK" => match ks.zrank(&args[1], &args[2]) {
            Ok(Some(r)) => (Reply::Integer(r as i64), false),
            Ok(None) => (Reply::NullBulk, false),
            Err(e) => (store_err_to_reply(e), false),
        },
        "ZRANGE" => {
            let (start, end) = match parse_two_ints(&args[2], &args[3]) {
                Ok(v) => v,
                Err(r) => return (r, false),
            };
            match ks.zrange(&args[1], start, end) {
                Ok(items) => (
                    Reply::Array(items.into_iter().map(|(m, _)| Reply::bulk(m)).collect()),
                    false,
                ),
                Err(e) => (store_err_to_reply(e), false),
            }
        }
        "ZCARD" => match ks.zcard(&args[1]) {
            Ok(n) => (Reply::Integer(n), false),
            Err(e) => (store_err_to_reply(e), false),
        },
        "ZSCORE" => match ks.zscore(&args[1], &args[2]) {
            Ok(Some(s)) => (Reply::bulk(format_score(s)), false),
            Ok(None) => (Reply::NullBulk, false),
            Err(e) => (store_err_to_reply(e), false),
        },
        "ZREM" => match ks.zrem(&args[1], &args[2]) {
            Ok(removed) => (Reply::Integer(removed as i64), removed),
            Err(e) => (store_err_to_reply(e), false),
        },
        "KEYS" => (
            Reply::Array(ks.keys(&arg_str(&args[1])).into_iter().map(Reply::bulk).collect()),
            false,
        ),
        "REPLCONF" => {
            let sub = if args.len() > 1 { upper(&args[1]) } else { String::new() };
            match sub.as_str() {
                "ACK" => {
                    if let (Some(db), Some(handle)) = (db, &session.replica_handle) {
                        if let Ok(offset) = arg_str(&args[2]).parse() {
                            db.shared.repl.record_ack(handle, offset);
                        }
                    }
                    (Reply::None, false) // no reply sent for ACK
                }
                _ => (Reply::Ok, false),
            }
        }
        _ => (Reply::err(format!("'{name}' requires async handling")), false),
    }
}

fn parse_set_ttl(args: &[Bytes]) -> Result<Option<u64>, Reply> {
    let mut i = 3;
    let mut ttl = None;
    while i < args.len() {
        match upper(&args[i]).as_str() {
            "PX" => {
                let v = args.get(i + 1).and_then(|b| arg_str(b).parse::<u64>().ok());
                match v {
                    Some(ms) => {
                        ttl = Some(ms);
                        i += 2;
                    }
                    None => return Err(Reply::err("value is not an integer or out of range")),
                }
            }
            "EX" => {
                let v = args.get(i + 1).and_then(|b| arg_str(b).parse::<u64>().ok());
                match v {
                    Some(secs) => {
                        ttl = Some(secs * 1000);
                        i += 2;
                    }
                    None => return Err(Reply::err("value is not an integer or out of range")),
                }
            }
            // unknown flags are ignored, matching the permissive source behavior
            _ => i += 1,
        }
    }
    Ok(ttl)
}

fn parse_two_ints(a: &Bytes, b: &Bytes) -> Result<(i64, i64), Reply> {
    match (arg_str(a).parse(), arg_str(b).parse()) {
        (Ok(x), Ok(y)) => Ok((x, y)),
        _ => Err(Reply::err("value is not an integer or out of range")),
    }
}

fn format_score(score: f64) -> String {
    if score.fract() == 0.0 {
        format!("{}", score as i64)
    } else {
        score.to_string()
    }
}

/// Loads the configured snapshot file at startup.
pub fn load_snapshot(db: &Db) {
    let path = std::path::Path::new(&db.shared.config.dir).join(&db.shared.config.dbfilename);
    rdb::load_file(&db.shared.store, &path);
}
