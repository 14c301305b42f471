//! Interactive prompts on stdin

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result, bail};

/// Ask for a line of input; an empty answer falls back to `default`
pub fn ask(question: &str, default: &str) -> Result<String> {
    let answer = read_line(&format!("{question}: "))?;
    if answer.is_empty() && !default.is_empty() {
        println!("Using default: {default}");
        return Ok(default.to_string());
    }
    Ok(answer)
}

/// Yes/no question; only `y` or `yes` counts as yes
pub fn confirm(question: &str) -> Result<bool> {
    let answer = read_line(&format!("{question} (y/n): "))?;
    Ok(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
}

/// Ask for a 1-based choice among `count` options until one is valid
pub fn choose(question: &str, count: usize) -> Result<usize> {
    if count == 0 {
        bail!("nothing to choose from");
    }
    loop {
        let answer = read_line(&format!("{question} (1-{count}): "))?;
        match answer.parse::<usize>() {
            Ok(n) if (1..=count).contains(&n) => return Ok(n - 1),
            Ok(_) => println!("Please enter a number between 1 and {count}"),
            Err(_) => println!("Please enter a valid number"),
        }
    }
}

fn read_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush().context("Failed to flush stdout")?;

    let mut line = String::new();
    let read = io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    if read == 0 {
        bail!("stdin closed while waiting for input");
    }
    Ok(line.trim().to_string())
}
