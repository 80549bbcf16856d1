use log::{info, warn};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::metadata::{MetadataColumn, MetadataProvider};
use crate::util::is_zeroed;
use crate::{RandomiserError, Region, Result};

pub const NUM_SKILL_SETS: usize = 194;
pub const SKILL_SETS_OFFSET: usize = 8;
pub const SKILL_SET_SIZE_NA_EU: usize = 240;
pub const SKILL_SET_SIZE_JP: usize = 220;

pub const SLOTS_PER_SKILL_SET: usize = 10;
pub const SKILLS_OFFSET: usize = 44;
pub const SKILL_SIZE: usize = 12;
pub const TRAITS_OFFSET: usize = 164;
pub const TRAIT_SIZE: usize = 4;

/// Offset/size description of one repeated field inside a byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    pub offset: usize,
    pub size: usize,
    pub count: usize,
}

impl SlotLayout {
    pub const fn span(&self) -> usize {
        self.size * self.count
    }

    fn range(&self, index: usize) -> std::ops::Range<usize> {
        let start = self.offset + index * self.size;
        start..start + self.size
    }

    fn check_len(&self, buf: &[u8], what: &'static str) -> Result<()> {
        let needed = self.offset + self.span();
        if buf.len() < needed {
            return Err(RandomiserError::MalformedRecordStream {
                what,
                expected: needed,
                actual: buf.len(),
            });
        }
        Ok(())
    }

    /// Copy every slot out of `buf`.
    pub fn extract(&self, buf: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.check_len(buf, "slot buffer")?;
        Ok((0..self.count).map(|i| buf[self.range(i)].to_vec()).collect())
    }

    /// Write `slots` back over exactly the bytes they were read from.
    pub fn commit(&self, buf: &mut [u8], slots: &[Vec<u8>]) -> Result<()> {
        self.check_len(buf, "slot buffer")?;
        if slots.len() != self.count {
            return Err(RandomiserError::MalformedRecordStream {
                what: "slot count",
                expected: self.count,
                actual: slots.len(),
            });
        }
        if let Some(slot) = slots.iter().find(|slot| slot.len() != self.size) {
            return Err(RandomiserError::MalformedRecordStream {
                what: "slot size",
                expected: self.size,
                actual: slot.len(),
            });
        }
        for (i, slot) in slots.iter().enumerate() {
            buf[self.range(i)].copy_from_slice(slot);
        }
        Ok(())
    }
}

pub const SKILL_LAYOUT: SlotLayout = SlotLayout {
    offset: SKILLS_OFFSET,
    size: SKILL_SIZE,
    count: SLOTS_PER_SKILL_SET,
};

pub const TRAIT_LAYOUT: SlotLayout = SlotLayout {
    offset: TRAITS_OFFSET,
    size: TRAIT_SIZE,
    count: SLOTS_PER_SKILL_SET,
};

pub fn skill_set_layout(region: Region) -> SlotLayout {
    let size = match region {
        Region::Japan => SKILL_SET_SIZE_JP,
        Region::NorthAmerica | Region::Europe => SKILL_SET_SIZE_NA_EU,
    };
    SlotLayout {
        offset: SKILL_SETS_OFFSET,
        size,
        count: NUM_SKILL_SETS,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skill {
    pub raw: [u8; SKILL_SIZE],
}

impl Skill {
    pub fn is_empty(&self) -> bool {
        is_zeroed(&self.raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trait {
    pub raw: [u8; TRAIT_SIZE],
}

impl Trait {
    pub fn is_empty(&self) -> bool {
        is_zeroed(&self.raw)
    }
}

/// Copied view of one skill-set record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillSet {
    pub raw: Vec<u8>,
}

impl SkillSet {
    pub fn can_upgrade(&self) -> bool {
        self.raw.first().map_or(false, |&b| b != 0)
    }

    pub fn skills(&self) -> Result<Vec<Skill>> {
        Ok(SKILL_LAYOUT
            .extract(&self.raw)?
            .into_iter()
            .map(|b| {
                let mut raw = [0u8; SKILL_SIZE];
                raw.copy_from_slice(&b);
                Skill { raw }
            })
            .collect())
    }

    pub fn set_skills(&mut self, skills: &[Skill]) -> Result<()> {
        let slots: Vec<Vec<u8>> = skills.iter().map(|s| s.raw.to_vec()).collect();
        SKILL_LAYOUT.commit(&mut self.raw, &slots)
    }

    pub fn traits(&self) -> Result<Vec<Trait>> {
        Ok(TRAIT_LAYOUT
            .extract(&self.raw)?
            .into_iter()
            .map(|b| {
                let mut raw = [0u8; TRAIT_SIZE];
                raw.copy_from_slice(&b);
                Trait { raw }
            })
            .collect())
    }

    pub fn set_traits(&mut self, traits: &[Trait]) -> Result<()> {
        let slots: Vec<Vec<u8>> = traits.iter().map(|t| t.raw.to_vec()).collect();
        TRAIT_LAYOUT.commit(&mut self.raw, &slots)
    }
}

/// `SkillTbl.bin`, kept as the original blob so unknown regions survive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillSetTable {
    raw: Vec<u8>,
    region: Region,
}

impl SkillSetTable {
    pub fn expected_size(region: Region) -> usize {
        let layout = skill_set_layout(region);
        layout.offset + layout.span()
    }

    pub fn from_bytes(raw: &[u8], region: Region) -> Result<Self> {
        let expected = Self::expected_size(region);
        if raw.len() < expected {
            return Err(RandomiserError::MalformedRecordStream {
                what: "skill set table",
                expected,
                actual: raw.len(),
            });
        }
        if raw.len() != expected {
            warn!(
                "Skill set table is {} bytes, expected {} for {:?}; continuing with computed offsets",
                raw.len(),
                expected,
                region
            );
        }
        Ok(SkillSetTable {
            raw: raw.to_vec(),
            region,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.raw.clone()
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn skill_sets(&self) -> Result<Vec<SkillSet>> {
        Ok(skill_set_layout(self.region)
            .extract(&self.raw)?
            .into_iter()
            .map(|raw| SkillSet { raw })
            .collect())
    }

    pub fn set_skill_sets(&mut self, skill_sets: &[SkillSet]) -> Result<()> {
        let slots: Vec<Vec<u8>> = skill_sets.iter().map(|s| s.raw.clone()).collect();
        skill_set_layout(self.region).commit(&mut self.raw, &slots)
    }
}

/// Shuffle every non-empty (skill, trait) pair across the eligible skill sets.
/// Returns the number of pairs that took part.
pub fn shuffle_skill_sets<R: Rng>(
    table: &mut SkillSetTable,
    metadata: &dyn MetadataProvider,
    rng: &mut R,
) -> Result<usize> {
    let skill_sets = table.skill_sets()?;

    let mut coords: Vec<(usize, usize)> = Vec::new();
    let mut pairs: Vec<(Skill, Trait)> = Vec::new();
    for (set_index, skill_set) in skill_sets.iter().enumerate() {
        if metadata.flag(set_index, MetadataColumn::Exclude) {
            continue;
        }
        for (slot, (skill, tr)) in skill_set
            .skills()?
            .into_iter()
            .zip(skill_set.traits()?)
            .enumerate()
        {
            if skill.is_empty() && tr.is_empty() {
                continue;
            }
            coords.push((set_index, slot));
            pairs.push((skill, tr));
        }
    }

    pairs.shuffle(rng);

    // Write into fresh copies so later reads still see the original data.
    let mut shuffled = table.skill_sets()?;
    for (&(set_index, slot), (skill, tr)) in coords.iter().zip(pairs) {
        let skill_set = &mut shuffled[set_index];

        let mut skills = skill_set.skills()?;
        let mut traits = skill_set.traits()?;
        skills[slot] = skill;
        traits[slot] = tr;
        skill_set.set_skills(&skills)?;
        skill_set.set_traits(&traits)?;
    }
    table.set_skill_sets(&shuffled)?;

    info!("Shuffled {} skill/trait pairs across skill sets.", coords.len());
    Ok(coords.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MetadataRow, MetadataTable};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn table_with_pairs(region: Region) -> Vec<u8> {
        let layout = skill_set_layout(region);
        let mut raw = vec![0u8; SkillSetTable::expected_size(region)];
        raw[..4].copy_from_slice(b"SKTB");
        for set in 0..NUM_SKILL_SETS {
            let base = layout.offset + set * layout.size;
            raw[base] = 1;
            // Three filled slots per set, tagged with the set index.
            for slot in 0..3 {
                let s = base + SKILLS_OFFSET + slot * SKILL_SIZE;
                raw[s] = set as u8;
                raw[s + 1] = slot as u8 + 1;
                let t = base + TRAITS_OFFSET + slot * TRAIT_SIZE;
                raw[t] = set as u8;
                raw[t + 1] = slot as u8 + 1;
            }
        }
        raw
    }

    #[test]
    fn regions_have_different_record_sizes() {
        assert_eq!(SkillSetTable::expected_size(Region::NorthAmerica), 8 + 194 * 240);
        assert_eq!(SkillSetTable::expected_size(Region::Europe), 8 + 194 * 240);
        assert_eq!(SkillSetTable::expected_size(Region::Japan), 8 + 194 * 220);
    }

    #[test]
    fn round_trips_and_keeps_trailing_bytes() {
        let mut raw = table_with_pairs(Region::Japan);
        raw.extend_from_slice(&[9, 9, 9]);
        let table = SkillSetTable::from_bytes(&raw, Region::Japan).unwrap();
        let sets = table.skill_sets().unwrap();
        assert_eq!(sets.len(), NUM_SKILL_SETS);
        assert!(sets[0].can_upgrade());
        assert_eq!(table.to_bytes(), raw);
    }

    #[test]
    fn short_table_is_rejected() {
        let raw = vec![0u8; 100];
        assert!(matches!(
            SkillSetTable::from_bytes(&raw, Region::NorthAmerica),
            Err(RandomiserError::MalformedRecordStream { .. })
        ));
    }

    #[test]
    fn setters_replace_exact_span() {
        let raw = table_with_pairs(Region::NorthAmerica);
        let table = SkillSetTable::from_bytes(&raw, Region::NorthAmerica).unwrap();
        let mut set = table.skill_sets().unwrap()[4].clone();
        let len = set.raw.len();

        let mut skills = set.skills().unwrap();
        skills[9] = Skill { raw: [0xAB; SKILL_SIZE] };
        set.set_skills(&skills).unwrap();

        assert_eq!(set.raw.len(), len);
        let start = SKILLS_OFFSET + 9 * SKILL_SIZE;
        assert_eq!(&set.raw[start..start + SKILL_SIZE], &[0xAB; SKILL_SIZE]);
        assert_eq!(set.raw[TRAITS_OFFSET], 4);
    }

    #[test]
    fn shuffle_moves_pairs_together_and_skips_excluded() {
        let raw = table_with_pairs(Region::NorthAmerica);
        let mut table = SkillSetTable::from_bytes(&raw, Region::NorthAmerica).unwrap();

        let mut rows = vec![MetadataRow::default(); NUM_SKILL_SETS];
        rows[0].exclude = true;
        let metadata = MetadataTable::new(rows);

        let mut rng = StdRng::seed_from_u64(42);
        let moved = shuffle_skill_sets(&mut table, &metadata, &mut rng).unwrap();
        assert_eq!(moved, (NUM_SKILL_SETS - 1) * 3);

        let sets = table.skill_sets().unwrap();
        let original = SkillSetTable::from_bytes(&raw, Region::NorthAmerica).unwrap();
        assert_eq!(sets[0].raw, original.skill_sets().unwrap()[0].raw);

        let mut changed = false;
        for (i, set) in sets.iter().enumerate().skip(1) {
            let pairs = set.skills().unwrap().into_iter().zip(set.traits().unwrap());
            for (slot, (skill, tr)) in pairs.enumerate() {
                if slot >= 3 {
                    assert!(skill.is_empty() && tr.is_empty());
                    continue;
                }
                // Skill and trait travel as a pair.
                assert_eq!(skill.raw[0], tr.raw[0]);
                assert_eq!(skill.raw[1], tr.raw[1]);
                assert_ne!(skill.raw[0], 0);
                if skill.raw[0] as usize != i {
                    changed = true;
                }
            }
        }
        assert!(changed);
        assert_eq!(table.to_bytes().len(), raw.len());
    }

    #[test]
    fn wrong_sized_slots_are_rejected() {
        let raw = table_with_pairs(Region::NorthAmerica);
        let table = SkillSetTable::from_bytes(&raw, Region::NorthAmerica).unwrap();
        let mut set = table.skill_sets().unwrap()[1].clone();
        let before = set.clone();

        let nine = vec![Skill { raw: [1; SKILL_SIZE] }; SLOTS_PER_SKILL_SET - 1];
        assert!(matches!(
            set.set_skills(&nine),
            Err(RandomiserError::MalformedRecordStream { what: "slot count", expected: 10, actual: 9 })
        ));
        assert_eq!(set, before);

        let mut slots = SKILL_LAYOUT.extract(&set.raw).unwrap();
        slots[3].push(0);
        assert!(matches!(
            SKILL_LAYOUT.commit(&mut set.raw, &slots),
            Err(RandomiserError::MalformedRecordStream { what: "slot size", .. })
        ));

        let mut short = SkillSet { raw: vec![1; 50] };
        assert!(short.traits().is_err());
        assert!(short.set_skills(&before.skills().unwrap()).is_err());
    }
}
