use slipstream::collector::Collector;
use slipstream::config::EngineConfig;
use slipstream::engine::Engine;
use slipstream::graph::GraphBuilder;
use slipstream::key::hash_by;
use slipstream::node::{FnNode, LogSink, NodeBuilderExt, StatefulNode};
use slipstream::value::Value;

const TEXT: &str = "hello this is ssp hello this is sparta sparta is leonida";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  // Initialize logging
  tracing_subscriber::fmt::init();

  // SLIPSTREAM_BUFFER_SIZE overrides the default edge buffer
  let config = EngineConfig::from_env()?;

  let mut g = GraphBuilder::new();
  let words = g.add(
    FnNode::new(|out: &dyn Collector, _: Value| {
      for word in TEXT.split_whitespace() {
        out.collect(Value::from(word));
      }
      Ok(())
    })
    .named("words"),
  );

  let counter = StatefulNode::new(0i64, |count: &mut i64, out: &dyn Collector, v: Value| {
    *count += 1;
    out.collect(Value::from(format!("{}: {}", v.as_str()?, count)));
    Ok(())
  })
  .named("wordCounter")
  .with_parallelism(4);

  let counts = g
    .out(words)
    .key_by(hash_by(|v: &Value| v.payload().to_string()))
    .named("by word")
    .connect(counter);

  let (sink, log) = LogSink::new();
  g.out(counts).connect(sink.named("sink"));

  let graph = g.build()?;
  println!("Topology:\n{graph}");

  Engine::with_config(graph, config).execute().await?;

  let mut lines = log.strings();
  lines.sort();
  println!("Counts:");
  for line in lines {
    println!("  {line}");
  }
  Ok(())
}
