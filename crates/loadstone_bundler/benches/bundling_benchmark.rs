use std::path::PathBuf;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::prelude::SliceRandom;
use rand::{Rng, SeedableRng, rngs::StdRng};

use loadstone_bundler::{Bundler, BundlerConfig, DefaultBundler};
use loadstone_core::asset_graph::AssetGraph;
use loadstone_core::bundle_graph::BundleGraph;
use loadstone_core::types::{
  Asset, Dependency, DependencyBuilder, Environment, Priority, Target,
};

/// Parameters controlling the synthetic graph shape.
///
/// The generator is layered, roughly resembling a real application:
///
/// - Layer 0: entry assets
/// - Layer 1: route modules (lazy deps from entries)
/// - Layer 2: component modules (sync deps from routes)
/// - Layer 3: shared utility modules (sync deps from many components)
/// - Plus: some components import CSS (a type-change boundary)
#[derive(Debug, Clone, Copy)]
struct GraphConfig {
  num_entries: usize,
  num_routes: usize,
  num_components: usize,
  num_utils: usize,
  num_styles: usize,
  seed: u64,
}

fn make_asset(kind: &str, idx: usize, ext: &str, size: u32) -> Arc<Asset> {
  Arc::new(Asset::new(
    Arc::new(Environment::default()),
    PathBuf::from(format!("{kind}-{idx}.{ext}")),
    size,
  ))
}

fn add_import(
  asset_graph: &mut AssetGraph,
  from: usize,
  to: usize,
  priority: Priority,
  specifier: String,
) {
  let source_asset_id = asset_graph.get_asset(&from).unwrap().id.clone();
  let dep = DependencyBuilder::default()
    .specifier(specifier)
    .env(Arc::new(Environment::default()))
    .priority(priority)
    .source_asset_id(source_asset_id)
    .build();
  let dep_node = asset_graph.add_dependency(dep);
  asset_graph.add_edge(&from, &dep_node);
  asset_graph.add_edge(&dep_node, &to);
}

/// Generates a synthetic asset graph. Deterministic: uses `seed` for RNG.
fn generate_asset_graph(cfg: GraphConfig) -> AssetGraph {
  let mut rng = StdRng::seed_from_u64(cfg.seed);
  let mut asset_graph = AssetGraph::new();

  let mut entries = Vec::with_capacity(cfg.num_entries);
  for i in 0..cfg.num_entries {
    let asset = make_asset("entry", i, "js", 2_000);
    let entry_dep = Dependency::entry(
      asset.file_path.to_string_lossy().into_owned(),
      Target::default(),
    );
    let entry_dep_node = asset_graph.add_entry_dependency(entry_dep);
    let node = asset_graph.add_asset(asset);
    asset_graph.add_edge(&entry_dep_node, &node);
    entries.push(node);
  }

  let routes: Vec<usize> = (0..cfg.num_routes)
    .map(|i| asset_graph.add_asset(make_asset("route", i, "js", 5_000)))
    .collect();
  let components: Vec<usize> = (0..cfg.num_components)
    .map(|i| asset_graph.add_asset(make_asset("component", i, "js", 3_000)))
    .collect();
  let utils: Vec<usize> = (0..cfg.num_utils)
    .map(|i| asset_graph.add_asset(make_asset("util", i, "js", 40_000)))
    .collect();
  let styles: Vec<usize> = (0..cfg.num_styles)
    .map(|i| asset_graph.add_asset(make_asset("styles", i, "css", 1_000)))
    .collect();

  let routes_per_entry = 5usize.min(routes.len()).max(1);
  for (i, &entry) in entries.iter().enumerate() {
    for (j, &route) in routes
      .choose_multiple(&mut rng, routes_per_entry)
      .enumerate()
    {
      add_import(
        &mut asset_graph,
        entry,
        route,
        Priority::Lazy,
        format!("./route?e={i}&r={j}"),
      );
    }
  }

  let components_per_route = 10usize.min(components.len()).max(1);
  for (i, &route) in routes.iter().enumerate() {
    for (j, &component) in components
      .choose_multiple(&mut rng, components_per_route)
      .enumerate()
    {
      add_import(
        &mut asset_graph,
        route,
        component,
        Priority::Sync,
        format!("./component?r={i}&c={j}"),
      );
    }
  }

  let utils_per_component = 3usize.min(utils.len()).max(1);
  for (i, &component) in components.iter().enumerate() {
    for (j, &util) in utils
      .choose_multiple(&mut rng, utils_per_component)
      .enumerate()
    {
      add_import(
        &mut asset_graph,
        component,
        util,
        Priority::Sync,
        format!("./util?c={i}&u={j}"),
      );
    }
    if !styles.is_empty() && rng.gen_bool(0.1) {
      let &style = styles.choose(&mut rng).unwrap();
      add_import(
        &mut asset_graph,
        component,
        style,
        Priority::Sync,
        format!("./styles?c={i}"),
      );
    }
  }

  asset_graph
}

fn benchmark_default_bundler(c: &mut Criterion) {
  let mut group = c.benchmark_group("default_bundler");

  let configs = [
    ("small", 2, 10, 50, 10, 5),
    ("medium", 5, 50, 500, 40, 30),
    ("large", 10, 200, 2_000, 100, 100),
  ];

  for (name, entries, routes, components, utils, styles) in configs {
    let graph = generate_asset_graph(GraphConfig {
      num_entries: entries,
      num_routes: routes,
      num_components: components,
      num_utils: utils,
      num_styles: styles,
      seed: 42,
    });

    let bundler = DefaultBundler::new(BundlerConfig::default());

    group.bench_function(BenchmarkId::new("bundle", name), |b| {
      b.iter(|| {
        let mut bundle_graph = BundleGraph::from_asset_graph(black_box(&graph));
        bundler.bundle(black_box(&mut bundle_graph)).unwrap();
        black_box(bundle_graph);
      })
    });
  }

  group.finish();
}

criterion_group!(benches, benchmark_default_bundler);
criterion_main!(benches);
