use anyhow::Result;
use dialoguer::Password;

use labgate_common::helpers::hash::hash_password;

pub async fn command() -> Result<()> {
    let password = Password::new().with_prompt("Password to hash").interact()?;
    println!("{}", hash_password(&password));
    Ok(())
}
