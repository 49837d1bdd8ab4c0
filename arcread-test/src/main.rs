use std::io::Write;

fn main() {
    env_logger::init();
    let args = std::env::args().collect::<Vec<String>>();
    let path = match &*args {
        [_, cmd, path] if cmd == "list" => path,
        _ => panic!("usage: arcread-test list <archive>"),
    };

    let mut ar = arcread::ReadArchive::new();
    ar.support_filter_all().support_format_all();
    ar.open_file(path).expect("failed to open archive");
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let count = arcread_test::list(&mut ar, &mut out).expect("failed to read archive");
    out.flush().expect("failed to write to stdout");
    log::info!(
        "{count} entries, {} filter, {} format",
        ar.filter_name().unwrap_or("no"),
        ar.format_name().unwrap_or("no"),
    );
}
