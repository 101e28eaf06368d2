//! CRD YAML Generator
//!
//! This binary generates Kubernetes CRD manifests for the snapshot
//! resources registered by the snapshotter-operator.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/all.yaml

use snapshotter_operator::crd::generate_crds;

fn main() -> anyhow::Result<()> {
    for crd in generate_crds()? {
        println!("---");
        print!("{}", crd);
    }
    Ok(())
}
