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

//! Command-line configuration. Four flags, all optional with sane
//! defaults — there is no YAML/TOML config file to parse.

use crate::util::error::{Error, SkyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Replica,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub dir: String,
    pub dbfilename: String,
    pub replicaof: Option<(String, u16)>,
}

impl Config {
    pub fn role(&self) -> Role {
        if self.replicaof.is_some() {
            Role::Replica
        } else {
            Role::Primary
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 6379,
            dir: ".".to_string(),
            dbfilename: "dump.rdb".to_string(),
            replicaof: None,
        }
    }
}

/// Parses `std::env::args()` (skipping argv[0]) into a `Config`. An
/// unknown flag, or a flag missing its value, is a startup error.
pub fn parse_args(mut args: impl Iterator<Item = String>) -> SkyResult<Config> {
    args.next(); // argv[0]
    let mut cfg = Config::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--port" => {
                let v = next_value(&mut args, "--port")?;
                cfg.port = v
                    .parse()
                    .map_err(|_| Error::Other(format!("invalid --port value: {v}")))?;
            }
            "--dir" => {
                cfg.dir = next_value(&mut args, "--dir")?;
            }
            "--dbfilename" => {
                cfg.dbfilename = next_value(&mut args, "--dbfilename")?;
            }
            "--replicaof" => {
                let v = next_value(&mut args, "--replicaof")?;
                let mut parts = v.split_whitespace();
                let host = parts
                    .next()
                    .ok_or_else(|| Error::Other("--replicaof requires \"<host> <port>\"".into()))?
                    .to_string();
                let port: u16 = parts
                    .next()
                    .ok_or_else(|| Error::Other("--replicaof requires \"<host> <port>\"".into()))?
                    .parse()
                    .map_err(|_| Error::Other(format!("invalid --replicaof port in: {v}")))?;
                cfg.replicaof = Some((host, port));
            }
            other => return Err(Error::Other(format!("unknown argument: {other}"))),
        }
    }
    Ok(cfg)
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> SkyResult<String> {
    args.next()
        .ok_or_else(|| Error::Other(format!("{flag} requires a value")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args<'a>(v: &'a [&str]) -> impl Iterator<Item = String> + 'a {
        std::iter::once("kvd".to_string()).chain(v.iter().map(|s| s.to_string()))
    }

    #[test]
    fn defaults_when_no_flags() {
        let cfg = parse_args(args(&[])).unwrap();
        assert_eq!(cfg.port, 6379);
        assert_eq!(cfg.role(), Role::Primary);
    }

    #[test]
    fn parses_replicaof() {
        let cfg = parse_args(args(&["--replicaof", "127.0.0.1 7000", "--port", "7001"])).unwrap();
        assert_eq!(cfg.port, 7001);
        assert_eq!(cfg.replicaof, Some(("127.0.0.1".to_string(), 7000)));
        assert_eq!(cfg.role(), Role::Replica);
    }

    #[test]
    fn rejects_unknown_flag() {
        assert!(parse_args(args(&["--nope"])).is_err());
    }
}
