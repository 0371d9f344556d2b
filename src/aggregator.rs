//! Glue and verify gateway.
//!
//! Curve work is done by external BLS tools that read and write JSON files in their working
//! directory. Every invocation gets its own scratch directory under the configured root, removed
//! when the invocation ends whatever the outcome. The file names are fixed by the tools:
//!
//! | file                       | written by | contents                                  |
//! |----------------------------|------------|-------------------------------------------|
//! | `sign-result<i>.json`      | agent      | `{index, signature:{X,Y}}`                |
//! | `hash.json`                | agent      | `{message: <hex digest>}`                 |
//! | `BLS_keys<i>.json`         | agent      | `{BLSPublicKey0..3}`                      |
//! | `common_public_key.json`   | agent      | `{commonBLSPublicKey0..3}`                |
//! | `glue-result.json`         | glue tool  | `{signature:{X,Y}}`                       |
//! | `g1.json`                  | hash tool  | `{g1:{hint, hashPoint:{X,Y}}}`            |

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tempfile::TempDir;
use tokio::process::Command;

use crate::committee::{CommonPublicKey, PublicKeyShare};
use crate::config::{AgentConfig, CapabilityPaths};
use crate::digest::Digest;
use crate::error::{Result, SigningError};
use crate::round_log::RoundLog;
use crate::threshold_scheme::ThresholdScheme;
use crate::types::{AggregateSignature, PartialShare, Point};

const GLUE_RESULT: &str = "glue-result.json";
const HASH_FILE: &str = "hash.json";
const G1_FILE: &str = "g1.json";
const COMMON_KEY_FILE: &str = "common_public_key.json";

#[derive(Serialize)]
struct HashFile {
    message: String,
}

/// `glue-result.json`
#[derive(Deserialize)]
struct GlueResult {
    signature: Point,
}

/// `g1.json`
#[derive(Deserialize)]
struct G1Result {
    g1: G1,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct G1 {
    #[serde(deserialize_with = "string_or_number")]
    hint: String,
    hash_point: Point,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string, got {}", other))),
    }
}

/// Argument vector for one tool run.
#[derive(Debug, Default)]
struct ToolArgs(Vec<OsString>);

impl ToolArgs {
    fn threshold(t: usize, n: usize) -> Self {
        Self::default().value("--t", t).value("--n", n)
    }

    fn value(mut self, flag: &str, value: impl ToString) -> Self {
        self.0.push(flag.into());
        self.0.push(value.to_string().into());
        self
    }

    fn path(mut self, flag: &str, path: &Path) -> Self {
        self.0.push(flag.into());
        self.0.push(path.as_os_str().to_owned());
        self
    }
}

/// Runs the external BLS tools.
#[derive(Debug, Clone)]
pub struct Aggregator {
    paths: CapabilityPaths,
    scratch_root: PathBuf,
    accept_unverified_shares: bool,
}

impl Aggregator {
    pub fn new(paths: CapabilityPaths, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            paths,
            scratch_root: scratch_root.into(),
            accept_unverified_shares: false,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.capabilities.clone(), config.scratch_dir.clone())
            .accept_unverified_shares(config.accept_unverified_shares)
    }

    /// Let shares through unchecked when there is no verify tool.
    pub fn accept_unverified_shares(mut self, accept: bool) -> Self {
        self.accept_unverified_shares = accept;
        self
    }

    pub fn has_verifier(&self) -> bool {
        self.paths.verify.is_some()
    }

    fn action_dir(&self) -> Result<TempDir> {
        std::fs::create_dir_all(&self.scratch_root)?;
        Ok(tempfile::Builder::new()
            .prefix("bls-")
            .tempdir_in(&self.scratch_root)?)
    }

    /// Glue `shares` and attach the hash-to-curve point of `digest`.
    pub async fn glue(
        &self,
        t: usize,
        n: usize,
        digest: &Digest,
        shares: &[PartialShare],
        log: &RoundLog,
    ) -> Result<AggregateSignature> {
        let glue = tool_path(&self.paths.glue, "BLS glue")?;
        let hash_g1 = tool_path(&self.paths.hash_g1, "HashG1")?;
        let dir = self.action_dir()?;
        log.trace(format!(
            "BLS glue will work in {} with {} sign results",
            dir.path().display(),
            shares.len()
        ));

        let mut args = ToolArgs::threshold(t, n);
        for share in shares {
            let path = dir.path().join(format!("sign-result{}.json", share.node_index));
            write_json(&path, &share.to_share_file()).await?;
            args = args.path("--input", &path);
        }
        let args = args.path("--output", &dir.path().join(GLUE_RESULT));
        run_tool("BLS glue", glue, args, dir.path(), log).await?;
        let glued: GlueResult = read_json(&dir.path().join(GLUE_RESULT), "BLS glue").await?;
        log.debug("BLS glue success");

        write_json(
            &dir.path().join(HASH_FILE),
            &HashFile {
                message: digest.to_hex(),
            },
        )
        .await?;
        run_tool("HashG1", hash_g1, ToolArgs::threshold(t, n), dir.path(), log).await?;
        let g1: G1Result = read_json(&dir.path().join(G1_FILE), "HashG1").await?;

        Ok(AggregateSignature {
            signature: glued.signature,
            hash_src: digest.to_hex(),
            hash_point: g1.g1.hash_point,
            hint: g1.g1.hint,
        })
    }

    /// Check a glued signature against the chain's common key. Any failure reads as `false`.
    pub async fn verify_aggregate(
        &self,
        t: usize,
        n: usize,
        aggregate: &AggregateSignature,
        digest: &Digest,
        common_public_key: &CommonPublicKey,
        log: &RoundLog,
    ) -> bool {
        match self
            .try_verify_aggregate(t, n, aggregate, digest, common_public_key, log)
            .await
        {
            Ok(()) => {
                log.debug("BLS/summary verify success");
                true
            }
            Err(err) => {
                log.error(format!("BLS/summary verify error: {}", err));
                false
            }
        }
    }

    async fn try_verify_aggregate(
        &self,
        t: usize,
        n: usize,
        aggregate: &AggregateSignature,
        digest: &Digest,
        common_public_key: &CommonPublicKey,
        log: &RoundLog,
    ) -> Result<()> {
        let verify = tool_path(&self.paths.verify, "BLS verify")?;
        let dir = self.action_dir()?;
        write_json(&dir.path().join(GLUE_RESULT), aggregate).await?;
        write_json(
            &dir.path().join(HASH_FILE),
            &HashFile {
                message: digest.to_hex(),
            },
        )
        .await?;
        write_json(&dir.path().join(COMMON_KEY_FILE), common_public_key).await?;
        let args = ToolArgs::threshold(t, n).path("--input", &dir.path().join(GLUE_RESULT));
        run_tool("BLS/summary verify", verify, args, dir.path(), log).await?;
        Ok(())
    }

    /// Check one node's share against its public key share. Any failure reads as `false`,
    /// including a missing verify tool unless unverified shares were explicitly allowed.
    pub async fn verify_share(
        &self,
        t: usize,
        n: usize,
        share: &PartialShare,
        digest: &Digest,
        public_key: &PublicKeyShare,
        log: &RoundLog,
    ) -> bool {
        let index = share.node_index;
        if !self.has_verifier() && self.accept_unverified_shares {
            log.warn(format!(
                "BLS node #{} share accepted without verification, no verify tool configured",
                index
            ));
            return true;
        }
        match self.try_verify_share(t, n, share, digest, public_key, log).await {
            Ok(()) => {
                log.debug(format!("BLS node #{} verify success", index));
                true
            }
            Err(err) => {
                log.error(format!("BLS node #{} verify error: {}", index, err));
                false
            }
        }
    }

    async fn try_verify_share(
        &self,
        t: usize,
        n: usize,
        share: &PartialShare,
        digest: &Digest,
        public_key: &PublicKeyShare,
        log: &RoundLog,
    ) -> Result<()> {
        let verify = tool_path(&self.paths.verify, "BLS verify")?;
        let index = share.node_index;
        let dir = self.action_dir()?;
        let share_path = dir.path().join(format!("sign-result{}.json", index));
        write_json(&share_path, &share.to_share_file()).await?;
        write_json(
            &dir.path().join(HASH_FILE),
            &HashFile {
                message: digest.to_hex(),
            },
        )
        .await?;
        write_json(&dir.path().join(format!("BLS_keys{}.json", index)), public_key).await?;
        let args = ToolArgs::threshold(t, n)
            .value("--j", index)
            .path("--input", &share_path);
        run_tool("BLS verify", verify, args, dir.path(), log).await?;
        Ok(())
    }
}

#[async_trait]
impl ThresholdScheme for Aggregator {
    async fn verify_signature_share(
        &self,
        t: usize,
        n: usize,
        share: &PartialShare,
        digest: &Digest,
        public_key: &PublicKeyShare,
        log: &RoundLog,
    ) -> bool {
        self.verify_share(t, n, share, digest, public_key, log).await
    }

    async fn combine_signature_shares(
        &self,
        t: usize,
        n: usize,
        digest: &Digest,
        shares: &[PartialShare],
        log: &RoundLog,
    ) -> Result<AggregateSignature> {
        self.glue(t, n, digest, shares, log).await
    }

    fn can_verify_aggregate(&self) -> bool {
        self.has_verifier()
    }

    async fn verify_aggregate(
        &self,
        t: usize,
        n: usize,
        aggregate: &AggregateSignature,
        digest: &Digest,
        common_public_key: &CommonPublicKey,
        log: &RoundLog,
    ) -> bool {
        Aggregator::verify_aggregate(self, t, n, aggregate, digest, common_public_key, log).await
    }
}

fn tool_path<'a>(path: &'a Option<PathBuf>, tool: &str) -> Result<&'a Path> {
    path.as_deref()
        .ok_or_else(|| SigningError::Config(format!("{} tool path is not set", tool)))
}

async fn run_tool(
    tool: &str,
    program: &Path,
    args: ToolArgs,
    cwd: &Path,
    log: &RoundLog,
) -> Result<String> {
    log.trace(format!("will execute {}: {} {:?}", tool, program.display(), args.0));
    let output = Command::new(program)
        .args(&args.0)
        .current_dir(cwd)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| SigningError::Capability {
            tool: tool.to_string(),
            detail: format!("cannot start {}: {}", program.display(), err),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    log.trace(format!(
        "{} output is:\n{}",
        tool,
        if stdout.is_empty() { "<<EMPTY>>" } else { stdout.as_str() }
    ));
    if !output.status.success() {
        return Err(SigningError::Capability {
            tool: tool.to_string(),
            detail: format!(
                "exited with {}, stderr: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(stdout)
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    tokio::fs::write(path, serde_json::to_vec(value)?).await?;
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path, tool: &str) -> Result<T> {
    let raw = tokio::fs::read(path).await.map_err(|err| {
        SigningError::MalformedResult(format!("{} produced no {}: {}", tool, path.display(), err))
    })?;
    serde_json::from_slice(&raw).map_err(|err| {
        SigningError::MalformedResult(format!(
            "malformed {} result {}: {}",
            tool,
            String::from_utf8_lossy(&raw),
            err
        ))
    })
}
