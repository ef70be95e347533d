//! Print a bcrypt hash for a password, e.g. to reset an account by hand:
//! `UPDATE users SET password_hash = '<hash>' WHERE email = '...'`.

use bcrypt::{hash, DEFAULT_COST};
use std::env;

fn main() {
    let mut args = env::args().skip(1);
    let Some(password) = args.next() else {
        eprintln!("Usage: cargo run --bin hash-password <PASSWORD> [COST]");
        std::process::exit(1);
    };

    let cost = match args.next().map(|c| c.parse::<u32>()) {
        None => DEFAULT_COST,
        Some(Ok(cost)) if (4..=31).contains(&cost) => cost,
        Some(_) => {
            eprintln!("COST must be a number between 4 and 31");
            std::process::exit(1);
        }
    };

    if password.chars().count() < 6 {
        eprintln!("Warning: accounts require passwords of at least 6 characters");
    }

    match hash(&password, cost) {
        Ok(hashed) => {
            println!("\nCost : {}", cost);
            println!("Hash : {}\n", hashed);
        }
        Err(e) => {
            eprintln!("Error hashing password: {}", e);
            std::process::exit(1);
        }
    }
}
