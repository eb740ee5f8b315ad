use kube::CustomResourceExt;
use tideway::crd::{Application, Routing, TideJob};

fn main() -> anyhow::Result<()> {
    for crd in [Application::crd(), TideJob::crd(), Routing::crd()] {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
