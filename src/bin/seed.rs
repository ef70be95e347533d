//! Reset the database to a demo roster and catalogue.
//!
//! Usage: `DATABASE_URL=postgres://... cargo run --bin seed`
//!
//! Every table is truncated first.

use course_repository_backend::{
    auth::hash_password,
    db::{
        self,
        models::{CoursePatch, Level, MaterialType, NewCourse, NewMaterial, NewUser, Role},
        DbConfig, PgStore, Store,
    },
    StartupError,
};

struct DemoUser {
    name: &'static str,
    email: &'static str,
    password: &'static str,
    role: Role,
}

const USERS: &[DemoUser] = &[
    DemoUser {
        name: "Admin User",
        email: "admin@cmr.com",
        password: "Admin@123",
        role: Role::Admin,
    },
    DemoUser {
        name: "Student One",
        email: "student1@cmr.com",
        password: "Student@123",
        role: Role::Student,
    },
    DemoUser {
        name: "Student Two",
        email: "student2@cmr.com",
        password: "Student@123",
        role: Role::Student,
    },
];

type DemoMaterial = (&'static str, MaterialType, &'static str);

struct DemoCourse {
    title: &'static str,
    description: &'static str,
    code: &'static str,
    category: &'static str,
    level: Level,
    tags: &'static [&'static str],
    materials: &'static [DemoMaterial],
}

const COURSES: &[DemoCourse] = &[
    DemoCourse {
        title: "Introduction to React",
        description: "Learn the basics of React.js, components, state, and props.",
        code: "REACT101",
        category: "Web Development",
        level: Level::Beginner,
        tags: &["react", "javascript", "frontend"],
        materials: &[
            ("Lecture Notes", MaterialType::Note, "React is a library for building UIs..."),
            ("React Documentation", MaterialType::Pdf, "https://react.dev"),
            ("Intro Video", MaterialType::Video, "https://youtube.com/watch?v=Ke90Tje7VS0"),
        ],
    },
    DemoCourse {
        title: "Advanced Node.js",
        description: "Deep dive into Node.js, Express, and asynchronous programming.",
        code: "NODE201",
        category: "Web Development",
        level: Level::Advanced,
        tags: &["node", "javascript", "backend"],
        materials: &[
            (
                "Event Loop Guide",
                MaterialType::Pdf,
                "https://nodejs.org/en/docs/guides/event-loop-timers-and-nexttick/",
            ),
            ("Building REST APIs", MaterialType::Video, "https://youtube.com/watch?v=pKd0Rpw7O48"),
        ],
    },
    DemoCourse {
        title: "Database Schema Design",
        description: "Best practices for data modeling in document and relational stores.",
        code: "DB301",
        category: "Databases",
        level: Level::Intermediate,
        tags: &["databases", "modeling"],
        materials: &[(
            "Schema Design Patterns",
            MaterialType::Image,
            "https://webassets.mongodb.com/_com_assets/cms/mongodb_schema_design_patterns-1.png",
        )],
    },
    DemoCourse {
        title: "Full-Stack Web Development",
        description: "Build and ship a complete application from database to browser.",
        code: "FULL401",
        category: "Web Development",
        level: Level::Intermediate,
        tags: &["fullstack", "javascript"],
        materials: &[
            ("Project Roadmap", MaterialType::Pdf, "https://roadmap.sh/full-stack"),
            ("GitHub Repo", MaterialType::Note, "Practice projects are listed in the course repo"),
        ],
    },
    DemoCourse {
        title: "Data Science with Python",
        description: "Learn data analysis, visualization, and machine learning using Python.",
        code: "PYTHON501",
        category: "Data Science",
        level: Level::Intermediate,
        tags: &["python", "data", "machine learning"],
        materials: &[
            (
                "Pandas Cheat Sheet",
                MaterialType::Pdf,
                "https://pandas.pydata.org/Pandas_Cheat_Sheet.pdf",
            ),
            ("Intro to NumPy", MaterialType::Video, "https://youtube.com/watch?v=QUT1VHiLmmI"),
        ],
    },
    DemoCourse {
        title: "UI/UX Design Fundamentals",
        description: "Principles of user interface and user experience design.",
        code: "UIUX601",
        category: "Design",
        level: Level::Beginner,
        tags: &["design", "ux"],
        materials: &[(
            "Design Principles",
            MaterialType::Note,
            "Hierarchy, Balance, Contrast, and Space are key...",
        )],
    },
];

async fn connect(url: &str) -> Result<PgStore, StartupError> {
    let pool = db::init_pool(url, &DbConfig::default()).await?;
    db::run_migrations(&pool).await?;
    Ok(PgStore::new(pool))
}

async fn seed(store: &PgStore) -> Result<(), Box<dyn std::error::Error>> {
    sqlx::raw_sql("TRUNCATE users, courses, activity_logs")
        .execute(store.pool())
        .await?;
    tracing::info!("Tables cleared");

    for demo in USERS {
        let password_hash = hash_password(demo.password.to_string(), bcrypt::DEFAULT_COST).await?;
        store
            .create_user(NewUser {
                name: demo.name.to_string(),
                email: demo.email.to_string(),
                password_hash,
                role: demo.role,
            })
            .await?;
    }
    tracing::info!("{} users imported", USERS.len());

    for demo in COURSES {
        let course = store
            .create_course(NewCourse {
                title: demo.title.to_string(),
                description: demo.description.to_string(),
                code: demo.code.to_string(),
                category: demo.category.to_string(),
                level: demo.level,
                tags: demo.tags.iter().map(|t| t.to_string()).collect(),
            })
            .await?;

        for (title, kind, link) in demo.materials {
            store
                .add_material(
                    course.id,
                    NewMaterial {
                        title: title.to_string(),
                        kind: *kind,
                        link: link.to_string(),
                    },
                )
                .await?;
        }

        store
            .update_course(
                course.id,
                CoursePatch {
                    is_published: Some(true),
                    ..Default::default()
                },
            )
            .await?;
    }
    tracing::info!("{} courses imported", COURSES.len());

    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let url = match std::env::var("DATABASE_URL") {
        Ok(url) if url.starts_with("postgres") => url,
        _ => {
            eprintln!("DATABASE_URL must point at a Postgres database");
            std::process::exit(1);
        }
    };

    let store = match connect(&url).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Failed to connect: {}", e);
            std::process::exit(1);
        }
    };

    let outcome = seed(&store).await;
    store.close().await;

    match outcome {
        Ok(()) => println!("Data imported!"),
        Err(e) => {
            eprintln!("Seeding failed: {}", e);
            std::process::exit(1);
        }
    }
}
