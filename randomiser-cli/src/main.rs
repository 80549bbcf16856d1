use clap::{Parser, ValueEnum};
use log::info;
use rand::Rng;
use std::path::{Path, PathBuf};

use randomiser_core::{
    run, CharacterEncoding, Event, InstructionSet, MonsterShufflePolicy, RandomiserSettings,
    Region, TableEncoding,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RegionArg {
    NorthAmerica,
    Europe,
    Japan,
}

impl From<RegionArg> for Region {
    fn from(region: RegionArg) -> Self {
        match region {
            RegionArg::NorthAmerica => Region::NorthAmerica,
            RegionArg::Europe => Region::Europe,
            RegionArg::Japan => Region::Japan,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "dqmj-randomiser",
    version,
    about = "Dragon Quest Monsters: Joker randomiser tool"
)]
struct Args {
    /// JSON settings file. Flags given on the command line take precedence.
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    #[arg(long, required_unless_present_any = ["settings", "dump_event"])]
    input: Option<PathBuf>,

    #[arg(long, required_unless_present_any = ["settings", "dump_event"])]
    output: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_enum)]
    region: Option<RegionArg>,

    /// Directory with btl_enmy_prm_info.json and skill_tbl_info.json.
    #[arg(long, value_name = "DIR")]
    metadata: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    instruction_table: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    character_table: Option<PathBuf>,

    #[arg(long)]
    no_monsters: bool,

    #[arg(long)]
    include_bosses: bool,

    #[arg(long)]
    include_starters: bool,

    #[arg(long)]
    include_gift_monsters: bool,

    /// Let boss item drops move with the shuffled monster.
    #[arg(long)]
    no_transfer_item_drops: bool,

    #[arg(long)]
    no_transfer_scout_chance: bool,

    #[arg(long)]
    no_transfer_experience: bool,

    #[arg(long)]
    no_transfer_gold: bool,

    /// Keep encounters near their original stat total, within this many points.
    #[arg(long, value_name = "LENIENCY")]
    biased: Option<u32>,

    #[arg(long)]
    no_skill_sets: bool,

    #[arg(long)]
    remove_dialogue: bool,

    /// Debug-only: decode a single .evt file and print its text form.
    /// Normal randomisation is skipped when this is provided.
    #[arg(long, value_name = "EVT", hide = true)]
    dump_event: Option<PathBuf>,
}

fn load_settings(args: &Args) -> Result<RandomiserSettings, String> {
    let mut settings = match &args.settings {
        Some(path) => {
            let src = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
            RandomiserSettings::from_json_str(&src).map_err(|e| e.to_string())?
        }
        None => RandomiserSettings {
            seed: rand::thread_rng().gen(),
            ..RandomiserSettings::default()
        },
    };

    if let Some(seed) = args.seed {
        settings.seed = seed;
    }
    if let Some(input) = &args.input {
        settings.input_path = input.clone();
    }
    if let Some(output) = &args.output {
        settings.output_path = output.clone();
    }
    if let Some(region) = args.region {
        settings.region = region.into();
    }
    if args.metadata.is_some() {
        settings.metadata_path = args.metadata.clone();
    }
    if args.instruction_table.is_some() {
        settings.instruction_table = args.instruction_table.clone();
    }
    if args.character_table.is_some() {
        settings.character_table = args.character_table.clone();
    }

    if args.no_monsters {
        settings.monsters.randomize = false;
    }
    settings.monsters.include_bosses |= args.include_bosses;
    settings.monsters.include_starters |= args.include_starters;
    settings.monsters.include_gift_monsters |= args.include_gift_monsters;
    if args.no_transfer_item_drops {
        settings.monsters.transfer_boss_item_drops = false;
    }
    if args.no_transfer_scout_chance {
        settings.monsters.transfer_scout_chance = false;
    }
    if args.no_transfer_experience {
        settings.monsters.transfer_experience = false;
    }
    if args.no_transfer_gold {
        settings.monsters.transfer_gold = false;
    }
    if let Some(leniency) = args.biased {
        settings.monsters.policy = MonsterShufflePolicy::BiasedByStatTotal { leniency };
    }
    if args.no_skill_sets {
        settings.skill_sets.randomize = false;
    }
    settings.other.remove_dialogue |= args.remove_dialogue;

    Ok(settings)
}

fn dump_event(args: &Args, path: &Path) -> Result<String, String> {
    let set = match &args.instruction_table {
        Some(table) => std::fs::read_to_string(table)
            .map_err(|e| format!("Failed to read {:?}: {}", table, e))
            .and_then(|src| InstructionSet::from_json_str(&src).map_err(|e| e.to_string()))?,
        None => InstructionSet::default(),
    };
    let encoding: Box<dyn CharacterEncoding> = match &args.character_table {
        Some(table) => Box::new(
            std::fs::read_to_string(table)
                .map_err(|e| format!("Failed to read {:?}: {}", table, e))
                .and_then(|src| TableEncoding::from_json_str(&src).map_err(|e| e.to_string()))?,
        ),
        None => Box::new(TableEncoding::default()),
    };

    let data = std::fs::read(path).map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
    let event = Event::from_binary(&data, &set, encoding.as_ref())
        .map_err(|e| format!("Failed to decode {:?}: {}", path, e))?;
    event.to_text(encoding.as_ref()).map_err(|e| e.to_string())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    // Debug path: print a single event script and exit.
    if let Some(evt_path) = args.dump_event.as_ref() {
        match dump_event(&args, evt_path) {
            Ok(text) => print!("{}", text),
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    info!("Using seed {}", settings.seed);

    if let Err(err) = run(settings) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
