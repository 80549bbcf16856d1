use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::metadata::{MetadataColumn, MetadataProvider};
use crate::util::{read_u16_le, read_u32_le, write_u16_le};
use crate::{MonsterSettings, RandomiserError, Result};

pub const ENCOUNTER_MAGIC: [u8; 4] = *b"BEPT";
pub const ENCOUNTER_HEADER_SIZE: usize = 8;
pub const ENCOUNTER_RECORD_SIZE: usize = 88;

pub const NUM_ENEMY_SKILLS: usize = 6;
pub const NUM_ITEM_DROPS: usize = 2;
pub const NUM_SKILL_SET_IDS: usize = 3;

// Field offsets within one 88-byte record.
const SPECIES_OFFSET: usize = 0x00;
const UNKNOWN_A_OFFSET: usize = 0x02;
const SKILLS_OFFSET: usize = 0x08;
pub const ITEM_DROPS_OFFSET: usize = 0x20;
const GOLD_OFFSET: usize = 0x28;
const UNKNOWN_B_OFFSET: usize = 0x2A;
const EXP_OFFSET: usize = 0x2C;
const UNKNOWN_C_OFFSET: usize = 0x2E;
const LEVEL_OFFSET: usize = 0x30;
const UNKNOWN_D_OFFSET: usize = 0x31;
const UNKNOWN_E_OFFSET: usize = 0x32;
const SCOUT_CHANCE_OFFSET: usize = 0x33;
const STATS_OFFSET: usize = 0x34; // max hp, max mp, atk, def, agi, wis
const UNKNOWN_F_OFFSET: usize = 0x40;
const SKILL_SET_IDS_OFFSET: usize = 0x54;
const UNKNOWN_G_OFFSET: usize = 0x57;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnemySkill {
    pub unknown: u16,
    pub skill_id: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemDrop {
    pub item_id: u16,
    /// Drop chance is 1 / 2^n.
    pub chance_denominator_power: u16,
}

/// One enemy encounter (`BtlEnmyPrm.bin` record).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnemyEncounter {
    pub species_id: u16,
    pub unknown_a: [u8; 6],
    pub skills: [EnemySkill; NUM_ENEMY_SKILLS],
    pub item_drops: [ItemDrop; NUM_ITEM_DROPS],
    pub gold: u16,
    pub unknown_b: [u8; 2],
    pub exp: u16,
    pub unknown_c: [u8; 2],
    pub level: u8,
    pub unknown_d: u8,
    pub unknown_e: u8,
    pub scout_chance: u8,
    pub max_hp: u16,
    pub max_mp: u16,
    pub attack: u16,
    pub defense: u16,
    pub agility: u16,
    pub wisdom: u16,
    pub unknown_f: [u8; 20],
    pub skill_set_ids: [u8; NUM_SKILL_SET_IDS],
    pub unknown_g: u8,
}

fn array_at<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}

impl EnemyEncounter {
    pub fn from_bytes(raw: &[u8; ENCOUNTER_RECORD_SIZE]) -> Self {
        let mut skills = [EnemySkill::default(); NUM_ENEMY_SKILLS];
        for (i, skill) in skills.iter_mut().enumerate() {
            let base = SKILLS_OFFSET + i * 4;
            *skill = EnemySkill {
                unknown: read_u16_le(raw, base),
                skill_id: read_u16_le(raw, base + 2),
            };
        }

        let mut item_drops = [ItemDrop::default(); NUM_ITEM_DROPS];
        for (i, drop) in item_drops.iter_mut().enumerate() {
            let base = ITEM_DROPS_OFFSET + i * 4;
            *drop = ItemDrop {
                item_id: read_u16_le(raw, base),
                chance_denominator_power: read_u16_le(raw, base + 2),
            };
        }

        EnemyEncounter {
            species_id: read_u16_le(raw, SPECIES_OFFSET),
            unknown_a: array_at(raw, UNKNOWN_A_OFFSET),
            skills,
            item_drops,
            gold: read_u16_le(raw, GOLD_OFFSET),
            unknown_b: array_at(raw, UNKNOWN_B_OFFSET),
            exp: read_u16_le(raw, EXP_OFFSET),
            unknown_c: array_at(raw, UNKNOWN_C_OFFSET),
            level: raw[LEVEL_OFFSET],
            unknown_d: raw[UNKNOWN_D_OFFSET],
            unknown_e: raw[UNKNOWN_E_OFFSET],
            scout_chance: raw[SCOUT_CHANCE_OFFSET],
            max_hp: read_u16_le(raw, STATS_OFFSET),
            max_mp: read_u16_le(raw, STATS_OFFSET + 2),
            attack: read_u16_le(raw, STATS_OFFSET + 4),
            defense: read_u16_le(raw, STATS_OFFSET + 6),
            agility: read_u16_le(raw, STATS_OFFSET + 8),
            wisdom: read_u16_le(raw, STATS_OFFSET + 10),
            unknown_f: array_at(raw, UNKNOWN_F_OFFSET),
            skill_set_ids: array_at(raw, SKILL_SET_IDS_OFFSET),
            unknown_g: raw[UNKNOWN_G_OFFSET],
        }
    }

    pub fn to_bytes(&self) -> [u8; ENCOUNTER_RECORD_SIZE] {
        let mut raw = [0u8; ENCOUNTER_RECORD_SIZE];

        write_u16_le(&mut raw, SPECIES_OFFSET, self.species_id);
        raw[UNKNOWN_A_OFFSET..UNKNOWN_A_OFFSET + 6].copy_from_slice(&self.unknown_a);
        for (i, skill) in self.skills.iter().enumerate() {
            let base = SKILLS_OFFSET + i * 4;
            write_u16_le(&mut raw, base, skill.unknown);
            write_u16_le(&mut raw, base + 2, skill.skill_id);
        }
        for (i, drop) in self.item_drops.iter().enumerate() {
            let base = ITEM_DROPS_OFFSET + i * 4;
            write_u16_le(&mut raw, base, drop.item_id);
            write_u16_le(&mut raw, base + 2, drop.chance_denominator_power);
        }
        write_u16_le(&mut raw, GOLD_OFFSET, self.gold);
        raw[UNKNOWN_B_OFFSET..UNKNOWN_B_OFFSET + 2].copy_from_slice(&self.unknown_b);
        write_u16_le(&mut raw, EXP_OFFSET, self.exp);
        raw[UNKNOWN_C_OFFSET..UNKNOWN_C_OFFSET + 2].copy_from_slice(&self.unknown_c);
        raw[LEVEL_OFFSET] = self.level;
        raw[UNKNOWN_D_OFFSET] = self.unknown_d;
        raw[UNKNOWN_E_OFFSET] = self.unknown_e;
        raw[SCOUT_CHANCE_OFFSET] = self.scout_chance;

        let stats = [
            self.max_hp,
            self.max_mp,
            self.attack,
            self.defense,
            self.agility,
            self.wisdom,
        ];
        for (i, stat) in stats.iter().enumerate() {
            write_u16_le(&mut raw, STATS_OFFSET + i * 2, *stat);
        }

        raw[UNKNOWN_F_OFFSET..UNKNOWN_F_OFFSET + 20].copy_from_slice(&self.unknown_f);
        raw[SKILL_SET_IDS_OFFSET..SKILL_SET_IDS_OFFSET + NUM_SKILL_SET_IDS]
            .copy_from_slice(&self.skill_set_ids);
        raw[UNKNOWN_G_OFFSET] = self.unknown_g;

        raw
    }

    /// Attack + defense + agility + wisdom. HP and MP are left out on purpose.
    pub fn simple_stat_total(&self) -> u32 {
        self.attack as u32 + self.defense as u32 + self.agility as u32 + self.wisdom as u32
    }
}

/// The whole `BtlEnmyPrm.bin` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncounterTable {
    pub magic: [u8; 4],
    pub entries: Vec<EnemyEncounter>,
}

impl EncounterTable {
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < ENCOUNTER_HEADER_SIZE {
            return Err(RandomiserError::MalformedRecordStream {
                what: "encounter table header",
                expected: ENCOUNTER_HEADER_SIZE,
                actual: raw.len(),
            });
        }

        let magic: [u8; 4] = array_at(raw, 0);
        if magic != ENCOUNTER_MAGIC {
            warn!(
                "Encounter table has unexpected magic {:02x?} (expected {:02x?})",
                magic, ENCOUNTER_MAGIC
            );
        }

        let count = read_u32_le(raw, 4) as usize;
        let needed = count
            .checked_mul(ENCOUNTER_RECORD_SIZE)
            .and_then(|n| n.checked_add(ENCOUNTER_HEADER_SIZE))
            .ok_or(RandomiserError::MalformedRecordStream {
                what: "encounter table records",
                expected: usize::MAX,
                actual: raw.len(),
            })?;
        if raw.len() < needed {
            return Err(RandomiserError::MalformedRecordStream {
                what: "encounter table records",
                expected: needed,
                actual: raw.len(),
            });
        }
        if raw.len() > needed {
            warn!(
                "Encounter table has {} trailing bytes after {} records; they will be dropped",
                raw.len() - needed,
                count
            );
        }

        let entries = raw[ENCOUNTER_HEADER_SIZE..needed]
            .chunks_exact(ENCOUNTER_RECORD_SIZE)
            .map(|chunk| EnemyEncounter::from_bytes(&array_at(chunk, 0)))
            .collect();

        Ok(EncounterTable { magic, entries })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(ENCOUNTER_HEADER_SIZE + self.entries.len() * ENCOUNTER_RECORD_SIZE);
        out.extend_from_slice(&self.magic);
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            out.extend_from_slice(&entry.to_bytes());
        }
        out
    }
}

/// How eligible encounters are rearranged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MonsterShufflePolicy {
    FullyRandom,
    /// Sort by stat total plus uniform noise in `[-leniency/2, leniency/2]`.
    BiasedByStatTotal { leniency: u32 },
}

impl Default for MonsterShufflePolicy {
    fn default() -> Self {
        MonsterShufflePolicy::FullyRandom
    }
}

/// Outcome of the stat-total check after a biased shuffle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatBoundReport {
    pub violations: usize,
    pub max_abs_diff: u32,
}

impl MonsterShufflePolicy {
    /// Rearrange `entries` in place. Each element keeps the index it came from.
    pub fn shuffle<R: Rng>(
        &self,
        entries: &mut [(usize, EnemyEncounter)],
        rng: &mut R,
    ) -> Option<StatBoundReport> {
        match *self {
            MonsterShufflePolicy::FullyRandom => {
                entries.shuffle(rng);
                None
            }
            MonsterShufflePolicy::BiasedByStatTotal { leniency } => {
                Some(biased_by_stat_total(entries, leniency, rng))
            }
        }
    }
}

fn biased_by_stat_total<R: Rng>(
    entries: &mut [(usize, EnemyEncounter)],
    leniency: u32,
    rng: &mut R,
) -> StatBoundReport {
    let previous: Vec<u32> = entries.iter().map(|(_, e)| e.simple_stat_total()).collect();

    // Positions ordered by stat total; stable so ties keep input order.
    let mut by_weight: Vec<(usize, u32)> = previous.iter().copied().enumerate().collect();
    by_weight.sort_by_key(|&(_, weight)| weight);

    let half = leniency as f64 / 2.0;
    let mut biased: Vec<(f64, usize)> = by_weight
        .iter()
        .map(|&(pos, weight)| (weight as f64 + rng.gen_range(-half..=half), pos))
        .collect();
    biased.sort_by(|a, b| a.0.total_cmp(&b.0));

    let snapshot: Vec<(usize, EnemyEncounter)> = entries.to_vec();
    for (k, &(_, src_pos)) in biased.iter().enumerate() {
        let dst_pos = by_weight[k].0;
        entries[dst_pos] = snapshot[src_pos].clone();
    }

    let mut report = StatBoundReport::default();
    let mut example: Option<(u32, u32)> = None;
    for (before, (_, after)) in previous.iter().zip(entries.iter()) {
        let after = after.simple_stat_total();
        let diff = after.abs_diff(*before);
        report.max_abs_diff = report.max_abs_diff.max(diff);
        if diff > leniency {
            report.violations += 1;
            example = Some((*before, after));
        }
    }

    if let Some((before, after)) = example {
        warn!(
            "Found {} encounter table entries that were swapped with encounters that have more stat difference than expected.",
            report.violations
        );
        warn!(
            "For example an encounter with a stat total of {} was swapped with a stat total of {}. {} > {}",
            before,
            after,
            after.abs_diff(before),
            leniency
        );
    }
    if report.max_abs_diff == 0 {
        warn!(
            "The max absolute stat total diff between shuffled encounters was 0. It's likely the shuffling did not work correctly."
        );
    }

    report
}

/// Summary of one encounter shuffle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncounterShuffleSummary {
    pub eligible: usize,
    pub item_drops_transferred: usize,
    pub stat_bound: Option<StatBoundReport>,
}

/// Indices that take part in the encounter shuffle.
pub fn eligible_encounter_indices(
    count: usize,
    metadata: &dyn MetadataProvider,
    settings: &MonsterSettings,
) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..count).collect();
    let mut filter = |column: MetadataColumn| {
        indices.retain(|&i| !metadata.flag(i, column));
    };

    filter(MetadataColumn::Exclude);
    // Gift incarnus must stay put, some cutscenes crash without it.
    filter(MetadataColumn::IsGiftIncarnus);
    if !settings.include_gift_monsters {
        filter(MetadataColumn::IsGiftMonster);
    }
    if !settings.include_starters {
        filter(MetadataColumn::IsStarter);
    }
    if !settings.include_bosses {
        filter(MetadataColumn::IsBoss);
    }

    indices
}

pub fn shuffle_encounters<R: Rng>(
    table: &mut EncounterTable,
    metadata: &dyn MetadataProvider,
    settings: &MonsterSettings,
    rng: &mut R,
) -> EncounterShuffleSummary {
    let eligible = eligible_encounter_indices(table.entries.len(), metadata, settings);
    info!(
        "Filtered down from {} to {} encounter entries to randomize.",
        table.entries.len(),
        eligible.len()
    );

    let originals: Vec<(usize, EnemyEncounter)> = eligible
        .iter()
        .map(|&i| (i, table.entries[i].clone()))
        .collect();
    let mut shuffled = originals.clone();

    info!("Randomizing monster encounters using policy: {:?}", settings.policy);
    let stat_bound = settings.policy.shuffle(&mut shuffled, rng);

    let mut item_drops_transferred = 0usize;
    for ((i, prev), (src, new)) in originals.iter().zip(shuffled.iter()) {
        let slot = &mut table.entries[*i];
        *slot = new.clone();

        if settings.transfer_boss_item_drops
            && (metadata.flag(*i, MetadataColumn::SwapDrop)
                || metadata.flag(*src, MetadataColumn::SwapDrop))
        {
            slot.item_drops = prev.item_drops;
            if metadata.flag(*i, MetadataColumn::SwapDrop) {
                item_drops_transferred += 1;
            }
        }
        if settings.transfer_scout_chance {
            slot.scout_chance = prev.scout_chance;
        }
        if settings.transfer_experience {
            slot.exp = prev.exp;
        }
        if settings.transfer_gold {
            slot.gold = prev.gold;
        }
    }

    if settings.transfer_boss_item_drops {
        info!("Swapped item drops for {} entries.", item_drops_transferred);
    }
    debug!("Encounter table still holds {} entries", table.entries.len());

    EncounterShuffleSummary {
        eligible: eligible.len(),
        item_drops_transferred,
        stat_bound,
    }
}
