//! `semloop tools`: List the addressable tools.

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let registry = semloop_tools::default_registry();
    let descriptors = registry.list();

    println!("{} tools ({} registered providers)", descriptors.len(), registry.len());
    for descriptor in descriptors {
        println!("  {:<18} {}", descriptor.name, descriptor.description);
        println!("  {:<18} input: {}", "", serde_json::to_string(&descriptor.input_schema)?);
    }

    Ok(())
}
