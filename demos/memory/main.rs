//! Simple example demonstrating the in-memory manager, filters and relations

use potion::prelude::*;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"
default_per_page: 2
resources:
  - name: user
    read_only_fields: [joined]
  - name: team
    relations:
      members:
        kind: collection
        target: user
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    println!("🚀 Potion-RS In-Memory Example\n");

    let config = PotionConfig::from_yaml_str(CONFIG)?;
    let user_meta = config
        .find_resource("user")
        .ok_or_else(|| anyhow::anyhow!("missing user resource"))?;

    let hooks = Hooks::new().on(Signal::AfterCreate, |event| {
        println!("📣 {} created: {}", event.resource, Value::Object(event.item.clone()));
    });
    let users = Arc::new(
        MemoryManager::from_meta(
            &user_meta,
            vec![
                Field::new("name", FieldType::String),
                Field::new("age", FieldType::Integer),
                Field::new("joined", FieldType::Date),
            ],
        )
        .with_hooks(hooks),
    );
    let team_meta = config
        .find_resource("team")
        .ok_or_else(|| anyhow::anyhow!("missing team resource"))?;
    let teams = Arc::new(MemoryManager::from_meta(&team_meta, Vec::new()));

    println!("📋 Creating users...\n");
    let mut created = Vec::new();
    for (name, age, joined) in [
        ("Alice", 34, "2019-04-01"),
        ("Bob", 27, "2021-09-15"),
        ("Carol", 41, "2015-01-20"),
        ("Dave", 19, "2023-06-30"),
    ] {
        created.push(
            users
                .create(item!({"name": name, "age": age, "joined": joined}), true)
                .await?,
        );
    }

    println!("\n🔍 Users aged 25 or more, oldest first:\n");
    let mut query = config
        .query()
        .where_json(users.filters(), &json!({"age": {"$gte": 25}}))?
        .sort(SortKey::desc("age"));
    loop {
        let page = query.run(users.as_ref()).await?;
        for user in &page.items {
            println!("  {} ({})", user["name"], user["age"]);
        }
        println!("  -- page {}/{} --", page.page, page.pages());
        if !page.has_next() {
            break;
        }
        query = query.clone().page(page.page + 1);
    }

    println!("\n🔗 Building a team...\n");
    let members = MemoryRelation::declared(teams.clone(), "members", users.clone())?;
    let mut team = teams.create(item!({"name": "core"}), true).await?;
    for user in &created[..3] {
        members.add(&mut team, user).await?;
    }
    users.delete(&created[1]).await?;

    let page = members.instances(&mut team, 1, 10).await?;
    println!("Team members after Bob left: {}", page.total);
    for user in &page.items {
        println!("  {}", user["name"]);
    }

    match users.read(&json!(99)).await {
        Err(ManagerError::ItemNotFound { id, .. }) => println!("\n❌ user {} not found", id),
        other => println!("\nunexpected: {:?}", other),
    }

    println!("\n✅ Example completed successfully!");
    Ok(())
}
