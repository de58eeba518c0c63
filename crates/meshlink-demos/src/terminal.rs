//! Terminal helpers: startup banners, the input prompt and stdin

use std::io::Write;

use tokio::io::{BufReader, Stdin};

/// Print the startup banner shown by each program
pub fn banner(title: &str) {
    let rule = "#".repeat(58);
    println!();
    println!("    {}", rule);
    println!("    #### {} {}", title, "#".repeat(58usize.saturating_sub(title.len() + 6)));
    println!("    {}", rule);
    println!();
}

/// Print the input prompt without a newline
pub fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

/// Buffered async stdin, read line by line by the program loops
pub fn stdin() -> BufReader<Stdin> {
    BufReader::new(tokio::io::stdin())
}
