use log::{debug, info, warn};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

mod util;
pub mod encoding;
pub mod encounter;
pub mod event;
pub mod instruction;
pub mod metadata;
pub mod script;
pub mod skill_set;

pub use encoding::{CharacterEncoding, TableEncoding};
pub use encounter::{EncounterTable, EnemyEncounter, MonsterShufflePolicy};
pub use event::Event;
pub use instruction::{Instruction, InstructionSet, InstructionType};
pub use metadata::{MetadataColumn, MetadataProvider, MetadataTable};
pub use script::{Script, ScriptEntry, ScriptError};
pub use skill_set::SkillSetTable;

/// Type id of the do-nothing instruction `ShowDialog` is swapped for.
pub const NOP_INSTRUCTION_ID: u32 = 0xAA;

const ENCOUNTER_SALT: u64 = 0xB7E1_E4A7_u64;
const SKILL_SET_SALT: u64 = 0x5C11_7B1E_u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Region {
    #[default]
    NorthAmerica,
    Europe,
    Japan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonsterSettings {
    pub randomize: bool,
    pub include_bosses: bool,
    pub include_starters: bool,
    pub include_gift_monsters: bool,
    pub transfer_boss_item_drops: bool,
    pub transfer_scout_chance: bool,
    pub transfer_experience: bool,
    pub transfer_gold: bool,
    pub policy: MonsterShufflePolicy,
}

impl Default for MonsterSettings {
    fn default() -> Self {
        MonsterSettings {
            randomize: true,
            include_bosses: false,
            include_starters: false,
            include_gift_monsters: false,
            transfer_boss_item_drops: true,
            transfer_scout_chance: true,
            transfer_experience: true,
            transfer_gold: true,
            policy: MonsterShufflePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillSetSettings {
    pub randomize: bool,
}

impl Default for SkillSetSettings {
    fn default() -> Self {
        SkillSetSettings { randomize: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtherSettings {
    pub remove_dialogue: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomiserSettings {
    pub seed: u64,
    pub region: Region,
    pub monsters: MonsterSettings,
    pub skill_sets: SkillSetSettings,
    pub other: OtherSettings,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Directory holding `btl_enmy_prm_info.json` and `skill_tbl_info.json`.
    pub metadata_path: Option<PathBuf>,
    pub instruction_table: Option<PathBuf>,
    pub character_table: Option<PathBuf>,
}

impl RandomiserSettings {
    pub fn from_json_str(src: &str) -> Result<Self> {
        Ok(serde_json::from_str(src)?)
    }
}

#[derive(Debug, Error)]
pub enum RandomiserError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("directory walk failed: {0}")]
    WalkDir(#[from] walkdir::Error),
    #[error("{}: {source}", .path.display())]
    File {
        path: PathBuf,
        source: Box<RandomiserError>,
    },
    #[error("malformed {what}: expected at least {expected} bytes, found {actual}")]
    MalformedRecordStream {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("instruction at 0x{offset:x} runs past the end of the stream")]
    TruncatedInstruction { offset: usize },
    #[error("invalid value location {0}")]
    InvalidValueLocation(u32),
    #[error("{name} decoded from {decoded} bytes but encodes to {encoded}")]
    InstructionLengthMismatch {
        name: String,
        decoded: usize,
        encoded: usize,
    },
    #[error("failed to decode instruction at 0x{offset:x}: {source}")]
    InstructionDecode {
        offset: usize,
        source: Box<RandomiserError>,
    },
    #[error("jump to unknown label '{0}'")]
    UnresolvedLabel(String),
    #[error("label '{label}' at 0x{offset:x} does not start an instruction")]
    LabelBoundaryMismatch { label: String, offset: u32 },
    #[error("label '{0}' defined more than once")]
    DuplicateLabel(String),
    #[error("arguments for {name} do not match: expected {expected}, got {got}")]
    ArgumentMismatch {
        name: String,
        expected: String,
        got: String,
    },
    #[error("text encoding error: {0}")]
    Encoding(String),
    #[error("script error: {0}")]
    Script(#[from] ScriptError),
}

pub type Result<T> = std::result::Result<T, RandomiserError>;

/// Shuffle the encounter table in `BtlEnmyPrm.bin`.
pub fn randomize_btl_enmy_prm(
    bytes: &[u8],
    metadata: &dyn MetadataProvider,
    settings: &RandomiserSettings,
) -> Result<Vec<u8>> {
    let mut table = EncounterTable::from_bytes(bytes)?;
    let mut rng = StdRng::seed_from_u64(settings.seed ^ ENCOUNTER_SALT);
    let summary =
        encounter::shuffle_encounters(&mut table, metadata, &settings.monsters, &mut rng);
    debug!("Encounter shuffle summary: {:?}", summary);
    Ok(table.to_bytes())
}

/// Shuffle skill/trait pairs in `SkillTbl.bin`.
pub fn randomize_skill_tbl(
    bytes: &[u8],
    metadata: &dyn MetadataProvider,
    settings: &RandomiserSettings,
) -> Result<Vec<u8>> {
    let mut table = SkillSetTable::from_bytes(bytes, settings.region)?;
    let mut rng = StdRng::seed_from_u64(settings.seed ^ SKILL_SET_SALT);
    skill_set::shuffle_skill_sets(&mut table, metadata, &mut rng)?;
    Ok(table.to_bytes())
}

/// Replace every `ShowDialog` in an `.evt` file with a same-sized no-op.
/// Returns the new bytes and how many instructions were replaced.
pub fn remove_dialogue(
    bytes: &[u8],
    set: &InstructionSet,
    encoding: &dyn CharacterEncoding,
) -> Result<(Vec<u8>, usize)> {
    let mut event = Event::from_binary(bytes, set, encoding)?;
    let replaced = event::silence_dialogue(&mut event, set, NOP_INSTRUCTION_ID);
    Ok((event.to_binary(encoding)?, replaced))
}

fn join_candidate(base: &Path, candidate: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    for part in candidate.split(['/', '\\']) {
        if !part.is_empty() {
            path.push(part);
        }
    }
    path
}

fn find_first_existing(base: &Path, candidates: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|candidate| join_candidate(base, candidate))
        .find(|path| path.exists())
}

fn load_metadata(settings: &RandomiserSettings, file_name: &str) -> Result<MetadataTable> {
    let Some(dir) = &settings.metadata_path else {
        warn!("No metadata directory set, {} treated as empty", file_name);
        return Ok(MetadataTable::default());
    };
    let path = dir.join(file_name);
    info!("Loading info file: {}", path.display());
    let table = fs::read_to_string(&path)
        .map_err(RandomiserError::from)
        .and_then(|src| MetadataTable::from_json_str(&src))
        .map_err(in_file(&path))?;
    info!("Successfully loaded {} rows from {}", table.len(), file_name);
    Ok(table)
}

/// Attach the file being processed to an error.
fn in_file(path: &Path) -> impl FnOnce(RandomiserError) -> RandomiserError {
    let path = path.to_path_buf();
    move |source| RandomiserError::File {
        path,
        source: Box::new(source),
    }
}

fn write_output(out_root: &Path, relative: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let dest = out_root.join(relative);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&dest, bytes)?;
    Ok(dest)
}

fn relative_to<'a>(base: &Path, path: &'a Path) -> &'a Path {
    path.strip_prefix(base).unwrap_or(path)
}

/// Run every enabled task over an extracted game directory.
pub fn run(settings: RandomiserSettings) -> Result<()> {
    if !settings.input_path.exists() {
        return Err(RandomiserError::Config(format!(
            "Input path does not exist: {}",
            settings.input_path.display()
        )));
    }

    if !settings.output_path.exists() {
        fs::create_dir_all(&settings.output_path)?;
    }

    info!("Randomising {} with seed {}", settings.input_path.display(), settings.seed);
    debug!("settings={:?}", settings);

    let mut log = format!("DQMJ Randomiser seed: {}\n", settings.seed);
    log.push_str(&format!("region: {:?}\n", settings.region));

    if settings.monsters.randomize {
        let src = find_first_existing(
            &settings.input_path,
            &["BtlEnmyPrm.bin", "data/BtlEnmyPrm.bin", "data/battle/BtlEnmyPrm.bin"],
        )
        .ok_or_else(|| {
            RandomiserError::Config(
                "Could not find BtlEnmyPrm.bin (enemy encounters) under input path".to_string(),
            )
        })?;

        let metadata = load_metadata(&settings, "btl_enmy_prm_info.json")?;
        let bytes = fs::read(&src)?;
        let out = randomize_btl_enmy_prm(&bytes, &metadata, &settings).map_err(in_file(&src))?;
        let dest = write_output(
            &settings.output_path,
            relative_to(&settings.input_path, &src),
            &out,
        )?;
        info!("Successfully updated: {}", dest.display());
        log.push_str(&format!(
            "BtlEnmyPrm.bin: {} -> {} (policy: {:?})\n",
            src.display(),
            dest.display(),
            settings.monsters.policy
        ));
    }

    if settings.skill_sets.randomize {
        let src = find_first_existing(
            &settings.input_path,
            &["SkillTbl.bin", "data/SkillTbl.bin", "data/battle/SkillTbl.bin"],
        )
        .ok_or_else(|| {
            RandomiserError::Config(
                "Could not find SkillTbl.bin (skill sets) under input path".to_string(),
            )
        })?;

        let metadata = load_metadata(&settings, "skill_tbl_info.json")?;
        let bytes = fs::read(&src)?;
        let out = randomize_skill_tbl(&bytes, &metadata, &settings).map_err(in_file(&src))?;
        let dest = write_output(
            &settings.output_path,
            relative_to(&settings.input_path, &src),
            &out,
        )?;
        info!("Successfully updated: {}", dest.display());
        log.push_str(&format!("SkillTbl.bin: {} -> {}\n", src.display(), dest.display()));
    }

    if settings.other.remove_dialogue {
        let set = match &settings.instruction_table {
            Some(path) => InstructionSet::from_json_str(&fs::read_to_string(path)?)?,
            None => {
                return Err(RandomiserError::Config(
                    "Removing dialogue needs an instruction table".to_string(),
                ))
            }
        };
        if set.by_name("ShowDialog").is_none() {
            warn!("Instruction table has no ShowDialog entry, no dialogue will be removed");
        }
        let encoding = match &settings.character_table {
            Some(path) => TableEncoding::from_json_str(&fs::read_to_string(path)?)?,
            None => TableEncoding::default(),
        };

        info!("Loading event files.");
        let mut files = 0usize;
        let mut replaced = 0usize;
        for entry in WalkDir::new(&settings.input_path).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("evt")
            {
                continue;
            }

            let bytes = fs::read(path)?;
            let (out, count) = remove_dialogue(&bytes, &set, &encoding).map_err(in_file(path))?;
            write_output(&settings.output_path, relative_to(&settings.input_path, path), &out)?;
            debug!("{}: replaced {} dialog instructions", path.display(), count);
            files += 1;
            replaced += count;
        }
        info!("Removed {} dialog instructions across {} event files.", replaced, files);
        log.push_str(&format!(
            "events: {} files, {} ShowDialog instructions removed\n",
            files, replaced
        ));
    }

    let log_path = settings.output_path.join("randomiser_log.txt");
    fs::write(&log_path, log)?;
    info!("Wrote summary to {}", log_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_fill_missing_fields_with_defaults() {
        let settings = RandomiserSettings::from_json_str(
            r#"{
                "seed": 7,
                "region": "Japan",
                "monsters": {"include_bosses": true, "policy": {"kind": "BiasedByStatTotal", "leniency": 50}},
                "other": {"remove_dialogue": true}
            }"#,
        )
        .unwrap();

        assert_eq!(settings.seed, 7);
        assert_eq!(settings.region, Region::Japan);
        assert!(settings.monsters.randomize);
        assert!(settings.monsters.include_bosses);
        assert!(!settings.monsters.include_starters);
        assert_eq!(
            settings.monsters.policy,
            MonsterShufflePolicy::BiasedByStatTotal { leniency: 50 }
        );
        assert!(settings.skill_sets.randomize);
        assert!(settings.other.remove_dialogue);
        assert!(settings.metadata_path.is_none());
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let err = RandomiserSettings::from_json_str(r#"{"monsters": {"policy": {"kind": "Sorted"}}}"#);
        assert!(matches!(err, Err(RandomiserError::Json(_))));
    }

    #[test]
    fn candidate_paths_accept_either_separator() {
        let base = Path::new("root");
        assert_eq!(
            join_candidate(base, "data\\battle/BtlEnmyPrm.bin"),
            Path::new("root").join("data").join("battle").join("BtlEnmyPrm.bin")
        );
    }

    #[test]
    fn missing_input_is_a_config_error() {
        let settings = RandomiserSettings {
            input_path: PathBuf::from("/definitely/not/here"),
            ..RandomiserSettings::default()
        };
        assert!(matches!(run(settings), Err(RandomiserError::Config(_))));
    }
}
