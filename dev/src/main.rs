use chrono::{DateTime, Utc};
use log::info;
use sequel::{Database, Queryable, Record};

#[derive(Record, Debug, Clone, Default)]
struct Author {
    #[db = "id,pk,managed"]
    id: i64,
    username: String,
    age: i32,
}

#[derive(Record, Debug, Clone, Default)]
struct Timestamps {
    created_at: Option<DateTime<Utc>>,
}

#[derive(Record, Debug, Clone, Default)]
struct Post {
    #[db = "id,pk,managed"]
    id: i64,
    author_id: i64,
    title: String,
    #[db(flatten)]
    stamps: Timestamps,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string());

    // Connect to the database
    let db = Database::builder().max_connections(1).connect(&database_url).await?;
    info!("connected to {} database", db.dialect());

    db.exec("CREATE TABLE authors (id INTEGER PRIMARY KEY AUTOINCREMENT, username TEXT NOT NULL, age INTEGER NOT NULL)", &[])
        .await?;
    db.exec(
        "CREATE TABLE posts (id INTEGER PRIMARY KEY AUTOINCREMENT, author_id INTEGER NOT NULL, title TEXT NOT NULL, created_at TEXT)",
        &[],
    )
    .await?;

    // Insert authors; generated ids are written back
    let mut authors = vec![
        Author { username: "alice".to_string(), age: 30, ..Default::default() },
        Author { username: "bob".to_string(), age: 25, ..Default::default() },
    ];
    let ids = db.insert("authors", &mut authors).await?;
    println!("Inserted authors with ids {ids:?}");

    // Insert posts inside a transaction
    let tx = db.begin().await?;
    let mut posts: Vec<Post> = authors
        .iter()
        .map(|a| Post {
            author_id: a.id,
            title: format!("Hello from {}", a.username),
            stamps: Timestamps { created_at: Some(Utc::now()) },
            ..Default::default()
        })
        .collect();
    let result = tx.insert("posts", &mut posts).await;
    tx.commit_or_rollback(result).await?;

    // Select with wildcard and sequence expansion
    let found: Vec<Author> =
        db.select("SELECT ** FROM authors WHERE username IN (?) ORDER BY id", &[&["alice", "bob"]]).await?;
    for author in &found {
        println!("Found author: {author:?}");
    }

    let post: Post = db.select_one("SELECT ** FROM posts WHERE author_id = ?", &[&found[0].id]).await?;
    println!("First post: {post:?}");

    let count = db.select_int("SELECT COUNT(*) FROM posts", &[]).await?;
    println!("Total posts: {count}");

    let expansion = db.expand("SELECT * FROM authors WHERE id IN (?) AND age > ?", &[&ids, &18])?;
    println!("Expanded: {} with {} arguments", expansion.sql, expansion.args.len());

    db.close().await;
    Ok(())
}
