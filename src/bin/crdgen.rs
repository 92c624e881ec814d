use kube::CustomResourceExt;
use serverless_controller::crd::ServerlessFunc;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&ServerlessFunc::crd())?);
    Ok(())
}
