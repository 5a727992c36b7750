use clap::Parser;
use color_eyre::eyre;
use std::path::PathBuf;
use tilecachesim::config::MemoryConfig;
use tilecachesim::sim::Simulator;
use tilecachesim::Context;

#[derive(Debug, Parser)]
#[command(author, version, about = "multi-tile shared-memory cache hierarchy simulator", long_about = None)]
struct Options {
    /// Memory system configuration (JSON); a small built-in system is
    /// used when omitted.
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,
    /// Memory operations to issue per tile.
    #[arg(long, default_value_t = 1000)]
    ops: usize,
    /// Bytes of shared address range the workload touches.
    #[arg(long, default_value_t = 65536)]
    footprint: u64,
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();
    let options = Options::parse();

    let config: MemoryConfig = match options.config {
        Some(ref path) => serde_json::from_reader(std::fs::File::open(path)?)?,
        None => MemoryConfig::default(),
    };
    let block_size = u64::from(config.block_size);
    let sim = Simulator::new(config)?;

    // every tile walks the same footprint; stores hit tile-private stripes
    // so lines migrate and invalidations flow
    for op in 0..options.ops {
        for tile in 0..sim.num_tiles() {
            let addr = (op as u64 * block_size) % options.footprint;
            if (op + tile) % 4 == 0 {
                sim.store(tile, Context::Main, addr, &[tile as u8; 4]);
            } else {
                let _ = sim.load(tile, Context::Main, addr, 4);
            }
            if op % 8 == 0 {
                let _ = sim.load(tile, Context::Companion, addr, 4);
            }
        }
    }
    sim.quiesce();

    serde_json::to_writer_pretty(std::io::stdout().lock(), &sim.stats())?;
    println!();
    Ok(())
}
