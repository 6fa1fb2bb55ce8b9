//! Benchmark for graph archiving using a synthetic geography dataset.
//!
//! Builds countries → states → cities, then measures encoding, decoding and
//! a chunked archive/restore cycle.
//!
//! Usage: `bench-archive [cities] [chunk_size]`
//! Set `RUST_LOG=graph_archive=info` to see per-chunk logs.

use std::sync::Arc;
use std::time::Instant;

use graph_archive::{
    ArchiveOptions, Archiver, AttributeKind, Context, EncodeOptions, RecordId, Schema, Value, VersionedTemplate,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const STATES_PER_COUNTRY: usize = 20;
const CITIES_PER_STATE: usize = 50;

const TIMEZONES: [&str; 6] = [
    "Europe/Paris",
    "America/New_York",
    "Asia/Tokyo",
    "Africa/Lagos",
    "Australia/Sydney",
    "America/Sao_Paulo",
];

// =============================================================================
// SCHEMA
// =============================================================================

fn schema() -> Arc<Schema> {
    let schema = Schema::builder()
        .entity("Country", |e| {
            e.attribute("name", AttributeKind::String)
                .attribute("code", AttributeKind::String)
                .ordered_to_many("states", "State", |r| r.cascade())
        })
        .entity("State", |e| {
            e.attribute("name", AttributeKind::String)
                .attribute("code", AttributeKind::String)
                .to_one("country", "Country", |r| r)
                .to_many("cities", "City", |r| r.cascade())
        })
        .entity("City", |e| {
            e.attribute("name", AttributeKind::String)
                .attribute("population", AttributeKind::Int64)
                .attribute("latitude", AttributeKind::Double)
                .attribute("longitude", AttributeKind::Double)
                .attribute("timezone", AttributeKind::String)
                .attribute("founded", AttributeKind::Date)
                .to_one("state", "State", |r| r)
        })
        .build()
        .expect("schema is valid");
    Arc::new(schema)
}

// =============================================================================
// DATA GENERATION
// =============================================================================

/// Small deterministic generator so runs are comparable.
struct SplitMix(u64);

impl SplitMix {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn unit(&mut self) -> f64 {
        (self.next() >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Populates `ctx` and returns the country records.
fn build_geography(ctx: &mut Context, cities: usize) -> Vec<RecordId> {
    let mut rng = SplitMix(0x5EED);
    let mut countries = Vec::new();
    let mut created = 0;

    while created < cities {
        let n = countries.len();
        let country = ctx.insert("Country").expect("Country exists");
        ctx.set_attribute(country, "name", format!("Country {n}")).expect("name");
        ctx.set_attribute(country, "code", format!("C{n:03}")).expect("code");
        countries.push(country);

        for s in 0..STATES_PER_COUNTRY {
            if created >= cities {
                break;
            }
            let state = ctx.insert("State").expect("State exists");
            ctx.set_attribute(state, "name", format!("State {n}-{s}")).expect("name");
            ctx.set_attribute(state, "code", format!("S{s:02}")).expect("code");
            ctx.add_to_many(country, "states", state).expect("states");

            for c in 0..CITIES_PER_STATE.min(cities - created) {
                let city = ctx.insert("City").expect("City exists");
                ctx.set_attribute(city, "name", format!("City {n}-{s}-{c}")).expect("name");
                ctx.set_attribute(city, "population", (rng.next() % 5_000_000) as i64)
                    .expect("population");
                ctx.set_attribute(city, "latitude", rng.unit() * 180.0 - 90.0).expect("latitude");
                ctx.set_attribute(city, "longitude", rng.unit() * 360.0 - 180.0).expect("longitude");
                // leave some timezones unset
                if rng.next() % 4 != 0 {
                    let tz = TIMEZONES[(rng.next() % TIMEZONES.len() as u64) as usize];
                    ctx.set_attribute(city, "timezone", tz).expect("timezone");
                }
                let founded = -((rng.next() % 10_000_000_000) as i64) * 1_000_000;
                ctx.set_attribute(city, "founded", Value::Date(founded)).expect("founded");
                ctx.add_to_many(state, "cities", city).expect("cities");
                created += 1;
            }
        }
    }
    countries
}

fn throughput(bytes: usize, secs: f64) -> f64 {
    (bytes as f64 / 1_000_000.0) / secs
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let mut args = std::env::args().skip(1);
    let cities: usize = args.next().and_then(|a| a.parse().ok()).unwrap_or(100_000);
    let chunk_size: usize = args.next().and_then(|a| a.parse().ok()).unwrap_or(4);

    let schema = schema();
    let template = VersionedTemplate::new("com.example.geography", "1").with_field("source", "synthetic");

    // Build the graph
    let build_start = Instant::now();
    let mut ctx = Context::new(schema.clone());
    let countries = build_geography(&mut ctx, cities);
    ctx.save();
    let build_time = build_start.elapsed();

    println!(
        "Built {} records ({} countries, {} cities) in {:?}",
        ctx.len(),
        countries.len(),
        ctx.records_of("City").len(),
        build_time
    );

    // Benchmark encoding (uncompressed)
    let plain = Archiver::new(schema.clone(), template.clone()).with_options(ArchiveOptions {
        encode: EncodeOptions::uncompressed(),
        ..ArchiveOptions::default()
    });
    let encode_start = Instant::now();
    let encoded = plain.archive_to_bytes(&ctx, &countries).expect("Failed to encode");
    let encode_time = encode_start.elapsed();

    println!("\nUncompressed: {} bytes in {:?}", encoded.len(), encode_time);
    println!(
        "  Throughput: {:.2} MB/s",
        throughput(encoded.len(), encode_time.as_secs_f64())
    );

    // Benchmark encoding (compressed)
    let archiver = Archiver::new(schema.clone(), template);
    let compress_start = Instant::now();
    let compressed = archiver.archive_to_bytes(&ctx, &countries).expect("Failed to compress");
    let compress_time = compress_start.elapsed();

    println!("\nCompressed (level 3): {} bytes in {:?}", compressed.len(), compress_time);
    println!(
        "  Compression ratio: {:.1}x",
        encoded.len() as f64 / compressed.len() as f64
    );

    // Benchmark decoding
    for (label, bytes) in [("uncompressed", &encoded), ("compressed", &compressed)] {
        let decode_start = Instant::now();
        let mut restored = Context::new(schema.clone());
        let roots = archiver.inserted_objects(bytes, &mut restored).expect("Failed to decode");
        let decode_time = decode_start.elapsed();

        assert_eq!(roots.len(), countries.len());
        assert_eq!(restored.len(), ctx.len());
        println!("\nDecode ({label}): {:?}", decode_time);
        println!(
            "  Throughput: {:.2} MB/s (uncompressed equivalent)",
            throughput(encoded.len(), decode_time.as_secs_f64())
        );
    }

    // Chunked archive and restore
    let root = tempfile::tempdir().expect("Failed to create temp dir");
    let chunk_start = Instant::now();
    let paths = archiver
        .create_archive(&ctx, &countries, chunk_size, root.path(), |n| {
            info!(archived = n, total = countries.len(), "archive progress");
        })
        .expect("Failed to create archive");
    let chunk_time = chunk_start.elapsed();
    println!(
        "\nChunked archive: {} chunks of {} countries in {:?}",
        paths.len(),
        chunk_size,
        chunk_time
    );

    let restore_start = Instant::now();
    let mut restored_records = 0;
    let report = archiver
        .save_from_archive(
            root.path(),
            |chunk, _roots| {
                restored_records += chunk.len();
                Ok::<_, std::io::Error>(())
            },
            |n| info!(restored = n, "restore progress"),
        )
        .expect("Failed to restore archive");
    let restore_time = restore_start.elapsed();

    assert_eq!(report.restored, countries.len());
    assert_eq!(restored_records, ctx.len());
    assert!(!archiver.has_archive(root.path()));
    println!(
        "Restore: {} chunks, {} roots, {} records in {:?}",
        report.chunks, report.restored, restored_records, restore_time
    );

    // Summary
    println!("\n=== Summary ===");
    println!("Records: {}", ctx.len());
    println!(
        "Uncompressed: {} bytes ({:.1} MB)",
        encoded.len(),
        encoded.len() as f64 / 1_000_000.0
    );
    println!(
        "Compressed: {} bytes ({:.1} MB)",
        compressed.len(),
        compressed.len() as f64 / 1_000_000.0
    );
    println!(
        "Bytes per record: {:.1} (uncompressed), {:.1} (compressed)",
        encoded.len() as f64 / ctx.len() as f64,
        compressed.len() as f64 / ctx.len() as f64
    );
}
