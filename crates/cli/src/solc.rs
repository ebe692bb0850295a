//! Synchronous solc compiler driver.
//!
//! Version handling carries two interoperability constraints from the
//! 0.4.x line: `--overwrite` does not exist on older point releases, so
//! the driver probes the resolved compiler before adding the flag; and
//! pragma-declared minima may understate what the source actually needs,
//! so a requested version older than the pragma minimum is bumped up to
//! it with a warning.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

/// First release that understands `--overwrite`.
const OVERWRITE_SUPPORTED_SINCE: Version = Version(0, 4, 11);

static PRAGMA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"pragma\s+solidity\s*[\^>=]*\s*(\d+)\.(\d+)\.(\d+)").expect("static regex")
});
static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)").expect("static regex"));

/// Compiler driver failures.
#[derive(Debug, Error)]
pub enum SolcError {
    #[error("compiler io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("solc exited with an error:\n{0}")]
    CompilerError(String),
    #[error("combined JSON missing or unreadable: {0}")]
    MissingCombinedJson(String),
    #[error("no contract named `{0}` in the compiler output")]
    ContractNotFound(String),
}

/// A `major.minor.patch` triple with lexicographic ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(pub u32, pub u32, pub u32);

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

impl Version {
    /// Parses the first `x.y.z` triple in `text`.
    pub fn parse(text: &str) -> Option<Version> {
        let caps = VERSION_RE.captures(text)?;
        Some(Version(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        ))
    }
}

/// The minimum compiler version declared by the source's pragma, if any.
pub fn pragma_minimum(source: &str) -> Option<Version> {
    let caps = PRAGMA_RE.captures(source)?;
    Some(Version(
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    ))
}

/// Everything the analysis needs from one compiler run.
#[derive(Debug, Default)]
pub struct CompilerArtifacts {
    /// Deployed-code hex; empty when the compiler produced none.
    pub runtime_bytecode: String,
    /// Instruction-indexed source map for the runtime code.
    pub srcmap_runtime: String,
    /// 4-byte selectors by function name, derived from the ABI.
    pub selectors: BTreeMap<String, String>,
    /// The contract the artefacts belong to.
    pub contract_name: String,
}

/// Invokes solc and collects the runtime artefacts for `contract_name`.
pub struct SolcDriver {
    version: Version,
}

impl SolcDriver {
    /// Picks the effective compiler version: the requested one, bumped up
    /// to the source's pragma minimum when the request is older.
    pub fn new(requested: &str, source: &str) -> SolcDriver {
        let requested_version = Version::parse(requested).unwrap_or(Version(0, 4, 25));
        let version = match pragma_minimum(source) {
            Some(minimum) if requested_version < minimum => {
                tracing::warn!(
                    requested = %requested_version,
                    pragma = %minimum,
                    "requested compiler older than pragma minimum; using the pragma version"
                );
                minimum
            }
            _ => requested_version,
        };
        SolcDriver { version }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Compiles `contract_path`, writing artefacts under `output_dir`.
    pub fn compile(
        &self,
        contract_path: &Path,
        output_dir: &Path,
        contract_name: &str,
    ) -> Result<CompilerArtifacts, SolcError> {
        self.select_version();
        let actual = self.probe_installed_version();
        fs::create_dir_all(output_dir)?;

        let mut cmd = Command::new("solc");
        cmd.arg("--bin")
            .arg("--bin-runtime")
            .arg("--asm")
            .arg("--combined-json")
            .arg("bin-runtime,srcmap-runtime,abi");
        if actual.is_none_or(|version| version >= OVERWRITE_SUPPORTED_SINCE) {
            cmd.arg("--overwrite");
        }
        cmd.arg("-o").arg(output_dir).arg(contract_path);

        tracing::debug!(?cmd, "invoking solc");
        let output = cmd.output()?;
        if !output.status.success() {
            return Err(SolcError::CompilerError(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }

        self.load_combined_json(output_dir, contract_name)
    }

    /// Switches the active compiler via solc-select when available;
    /// otherwise the system solc is used as-is.
    fn select_version(&self) {
        let version = self.version.to_string();
        let use_result = Command::new("solc-select").args(["use", &version]).output();
        match use_result {
            Ok(output) if output.status.success() => {
                tracing::debug!(%version, "solc-select switched version");
            }
            Ok(_) => {
                // The version may simply not be installed yet.
                let installed = Command::new("solc-select")
                    .args(["install", &version])
                    .output()
                    .and_then(|_| Command::new("solc-select").args(["use", &version]).output());
                match installed {
                    Ok(output) if output.status.success() => {
                        tracing::debug!(%version, "solc-select installed and switched");
                    }
                    _ => tracing::warn!(
                        %version,
                        "solc-select could not provide the version; falling back to system solc"
                    ),
                }
            }
            Err(_) => {
                tracing::debug!("solc-select not found; using system solc");
            }
        }
    }

    /// Asks the resolved `solc` binary what it actually is.
    fn probe_installed_version(&self) -> Option<Version> {
        let output = Command::new("solc").arg("--version").output().ok()?;
        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        let version = Version::parse(&text);
        tracing::debug!(?version, "probed installed solc");
        version
    }

    fn load_combined_json(
        &self,
        output_dir: &Path,
        contract_name: &str,
    ) -> Result<CompilerArtifacts, SolcError> {
        let path = output_dir.join("combined.json");
        let text =
            fs::read_to_string(&path).map_err(|e| SolcError::MissingCombinedJson(e.to_string()))?;
        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| SolcError::MissingCombinedJson(e.to_string()))?;

        let contracts = json
            .get("contracts")
            .and_then(|v| v.as_object())
            .ok_or_else(|| SolcError::MissingCombinedJson("no `contracts` object".into()))?;

        let (_, entry) = contracts
            .iter()
            .find(|(key, _)| {
                key.rsplit(':').next() == Some(contract_name) || key.as_str() == contract_name
            })
            .ok_or_else(|| SolcError::ContractNotFound(contract_name.to_string()))?;

        let runtime_bytecode = entry
            .get("bin-runtime")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let srcmap_runtime = entry
            .get("srcmap-runtime")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let selectors = selectors_from_abi(entry.get("abi"));

        Ok(CompilerArtifacts {
            runtime_bytecode,
            srcmap_runtime,
            selectors,
            contract_name: contract_name.to_string(),
        })
    }
}

/// Derives `name -> 4-byte selector` from an ABI fragment. Older
/// compilers emit the ABI as a JSON-encoded string, newer ones as an
/// array; both are accepted.
fn selectors_from_abi(abi: Option<&serde_json::Value>) -> BTreeMap<String, String> {
    let fragments: Vec<serde_json::Value> = match abi {
        Some(serde_json::Value::Array(items)) => items.clone(),
        Some(serde_json::Value::String(text)) => {
            serde_json::from_str::<Vec<serde_json::Value>>(text).unwrap_or_default()
        }
        _ => Vec::new(),
    };

    let mut selectors = BTreeMap::new();
    for fragment in fragments {
        if fragment.get("type").and_then(|v| v.as_str()) != Some("function") {
            continue;
        }
        let Some(name) = fragment.get("name").and_then(|v| v.as_str()) else {
            continue;
        };
        let inputs: Vec<String> = fragment
            .get("inputs")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|input| input.get("type").and_then(|v| v.as_str()))
                    .map(|ty| ty.to_string())
                    .collect()
            })
            .unwrap_or_default();
        let signature = format!("{}({})", name, inputs.join(","));

        let mut keccak = Keccak::v256();
        keccak.update(signature.as_bytes());
        let mut digest = [0u8; 32];
        keccak.finalize(&mut digest);
        selectors.insert(name.to_string(), hex::encode(&digest[..4]));
    }
    selectors
}
