#![allow(dead_code)]

use std::{
    collections::HashMap,
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use ima_bls::committee::{CommitteeNode, NetworkInfo};
use ima_bls::config::{AgentConfig, CapabilityPaths};
use ima_bls::error::{Result, SigningError};
use ima_bls::gatherer::{RoundContext, ShareSource};
use ima_bls::types::{Message, MessageBatch, SignResult};

const GLUE: &str = r#"#!/bin/sh
out=""
count=0
while [ $# -gt 0 ]; do
  case "$1" in
    --input) count=$((count+1)); shift ;;
    --output) out="$2"; shift ;;
  esac
  shift
done
echo "$count" >> "@LOG@/glue.log"
printf '{"signature":{"X":"111","Y":"222"}}' > "$out"
"#;

const HASH_G1: &str = r#"#!/bin/sh
[ -s hash.json ] || exit 1
printf '{"g1":{"hint":"3","hashPoint":{"X":"5","Y":"6"}}}' > g1.json
"#;

const VERIFY: &str = r#"#!/bin/sh
j=""
while [ $# -gt 0 ]; do
  case "$1" in
    --j) j="$2"; shift ;;
  esac
  shift
done
[ -s hash.json ] || exit 1
if [ -n "$j" ]; then
  grep -q BLSPublicKey0 "BLS_keys$j.json" || exit 1
  grep -q '"index":"'"$j"'"' "sign-result$j.json" || exit 1
  echo "$j" >> "@LOG@/verify-share.log"
  exit 0
fi
grep -q '"commonBLSPublicKey0":"c0"' common_public_key.json || exit 1
grep -q '"X":"111"' glue-result.json || exit 1
cat hash.json >> "@LOG@/verify-aggregate.log"
echo >> "@LOG@/verify-aggregate.log"
"#;

/// Shell stand-ins for the BLS tools, logging what they were given.
pub struct FakeTools {
    pub dir: TempDir,
    pub paths: CapabilityPaths,
}

impl FakeTools {
    pub fn new(with_verify: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let glue = write_script(dir.path(), "bls_glue", GLUE);
        let hash_g1 = write_script(dir.path(), "hash_g1", HASH_G1);
        let verify = with_verify.then(|| write_script(dir.path(), "verify_bls", VERIFY));
        Self {
            paths: CapabilityPaths {
                glue: Some(glue),
                hash_g1: Some(hash_g1),
                verify,
            },
            dir,
        }
    }

    /// Swap the script behind one tool, e.g. `bls_glue`, `hash_g1` or `verify_bls`.
    pub fn replace_tool(&self, name: &str, body: &str) {
        write_script(self.dir.path(), name, body);
    }

    /// Make the verify tool reject the share of node `index`.
    pub fn reject_share_of(&self, index: usize) {
        let rejecting = VERIFY.replacen(
            "[ -s hash.json ] || exit 1\n",
            &format!("[ -s hash.json ] || exit 1\n[ \"$j\" = \"{}\" ] && exit 1\n", index),
            1,
        );
        self.replace_tool("verify_bls", &rejecting);
    }

    /// Scratch directories still on disk.
    pub fn leftover_scratch(&self) -> usize {
        fs::read_dir(self.scratch()).map(|dir| dir.count()).unwrap_or(0)
    }

    pub fn scratch(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    /// Lines a tool appended to `<name>.log`, empty if it never ran.
    pub fn log(&self, name: &str) -> Vec<String> {
        fs::read_to_string(self.dir.path().join(format!("{}.log", name)))
            .unwrap_or_default()
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn config(&self) -> AgentConfig {
        let mut config = AgentConfig::default();
        config.sign_messages = true;
        config.capabilities = self.paths.clone();
        config.scratch_dir = self.scratch();
        config.chains.s_chain.name = "S1".to_string();
        config.gather.poll_period_ms = 20;
        config
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body.replace("@LOG@", &dir.display().to_string())).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn network(t: i64, n: i64, count: usize) -> NetworkInfo {
    let nodes: Vec<_> = (0..count)
        .map(|i| {
            json!({
                "nodeID": 100 + i,
                "name": format!("node{}", i),
                "ip": format!("10.0.0.{}", i + 1),
                "httpRpcPort": 10003,
                "imaInfo": {
                    "t": t,
                    "n": n,
                    "thisNodeIndex": i + 1,
                    "BLSPublicKey0": format!("{}0", i),
                    "BLSPublicKey1": format!("{}1", i),
                    "BLSPublicKey2": format!("{}2", i),
                    "BLSPublicKey3": format!("{}3", i),
                    "commonBLSPublicKey0": "c0",
                    "commonBLSPublicKey1": "c1",
                    "commonBLSPublicKey2": "c2",
                    "commonBLSPublicKey3": "c3"
                }
            })
        })
        .collect();
    serde_json::from_value(json!({ "network": nodes })).unwrap()
}

pub fn batch() -> MessageBatch {
    let messages = (1..=3)
        .map(|i| Message {
            sender: format!("0x{:040x}", i),
            destination_contract: format!("0x{:040x}", 0xd0 + i),
            data: format!("0x{:04x}", i * 7),
        })
        .collect();
    MessageBatch::new("S1", 10, messages)
}

#[derive(Debug, Clone, Copy)]
pub enum NodeReply {
    Share,
    Unreachable,
}

/// In-memory committee answering with canned shares.
pub struct CannedNodes(pub HashMap<usize, NodeReply>);

impl CannedNodes {
    pub fn all(count: usize, reply: NodeReply) -> Self {
        Self((0..count).map(|i| (i, reply)).collect())
    }
}

#[async_trait]
impl ShareSource for CannedNodes {
    async fn request_share(&self, node: &CommitteeNode, _round: &RoundContext) -> Result<SignResult> {
        match self.0.get(&node.position) {
            Some(NodeReply::Share) => Ok(SignResult::with_share(format!(
                "{}{}:{}{}",
                node.signer_index, node.signer_index, node.signer_index, node.signer_index
            ))),
            _ => Err(SigningError::Transport(format!("{} is unreachable", node.url))),
        }
    }
}
