use std::path::PathBuf;

use dirtally::scanner::{self, ScanOptions};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dirtally=info".parse().unwrap()),
        )
        .init();

    // Optional path argument, defaults to the filesystem root
    let scan_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            #[cfg(windows)]
            {
                PathBuf::from("C:\\")
            }
            #[cfg(not(windows))]
            {
                PathBuf::from("/")
            }
        });

    let (mut tree, report) = scanner::scan_path(&scan_path, &ScanOptions::default())?;
    let root = tree.root();

    println!(
        "[1] Scan completed: {} dirs, {} files, {} errors in {} ms",
        report.dirs_read, report.files_seen, report.errors, report.elapsed_ms
    );

    let summary = tree.summary(root);
    println!(
        "\n[2] Totals for '{}' ({}):",
        tree.get(root).name,
        scan_path.display()
    );
    println!(
        "    size: {:.2} GB ({} bytes)",
        summary.total_size as f64 / 1_073_741_824.0,
        summary.total_size
    );
    println!(
        "    items: {} ({} files, {} subdirs)",
        summary.total_items, summary.total_files, summary.total_sub_dirs
    );
    println!("    latest mtime: {} (epoch seconds)", summary.latest_mtime);

    println!("\n[3] Top 10 children of root by size:");
    let children: Vec<_> = tree.children(root).collect();
    let mut ranked: Vec<_> = children
        .into_iter()
        .map(|id| (id, tree.total_size(id)))
        .collect();
    ranked.sort_by_key(|&(_, size)| std::cmp::Reverse(size));

    for (i, &(id, size)) in ranked.iter().take(10).enumerate() {
        let entry = tree.get(id);
        println!(
            "    [{}] '{}' - {:.2} GB (dir={})",
            i,
            entry.name,
            size as f64 / 1_073_741_824.0,
            entry.is_dir()
        );
    }

    Ok(())
}
