use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use skc_manager::{Error, ExportEvent, SkcApp};

const USAGE: &str = "\
Usage: skc-manager [--root DIR] [--project NAME] <command> [args]

Commands:
  projects                      list projects (current marked with *)
  table                         print the current project's records
  statuses                      print the recognized status values
  add <product> <status> <codes...>
  modify <status> <codes...>
  delete <codes...>
  sort                          reorder SKCs by status rank
  image <product> <path>        attach an image to a product
  import <file.xlsx>            merge a spreadsheet into the project
  latest                        print the newest snapshot path
  new-project [name]
  import-project <folder>
  export-project <target-dir>
";

fn main() -> ExitCode {
    env_logger::init();

    let mut root = PathBuf::from(".");
    let mut project: Option<String> = None;
    let mut command: Vec<String> = Vec::new();

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--root" => match args.next() {
                Some(dir) => root = PathBuf::from(dir),
                None => {
                    eprintln!("--root needs a directory");
                    return ExitCode::FAILURE;
                }
            },
            "--project" => project = args.next(),
            _ => command.push(arg),
        }
    }

    if command.is_empty() {
        eprint!("{USAGE}");
        return ExitCode::FAILURE;
    }

    match run(root, project, &command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(root: PathBuf, project: Option<String>, command: &[String]) -> Result<(), Error> {
    let mut app = SkcApp::open(root)?;
    for issue in app.load_issues() {
        eprintln!(
            "warning: sidecar in {} could not be read, project starts empty: {}",
            issue.folder.display(),
            issue.detail
        );
    }
    if let Some(name) = project {
        app.switch_project(&name)?;
    }

    match command[0].as_str() {
        "projects" => {
            let current = app.current_project().name.clone();
            for name in app.registry().names() {
                let marker = if name == current { "*" } else { " " };
                println!("{marker} {name}");
            }
        }
        "table" => {
            for (product, skc, status) in app.table_rows() {
                println!("{product}\t{skc}\t{status}");
            }
        }
        "statuses" => {
            for status in app.status_options() {
                println!("{status}");
            }
        }
        "add" => {
            let [_, product, status, codes @ ..] = command else {
                return usage("add <product> <status> <codes...>");
            };
            if codes.is_empty() {
                return usage("add <product> <status> <codes...>");
            }
            let added = app.add_skcs(product, &codes.join(" "), status)?;
            println!("added {added} SKC(s), duplicates skipped");
            report_snapshot(&mut app);
        }
        "modify" => {
            let [_, status, codes @ ..] = command else {
                return usage("modify <status> <codes...>");
            };
            let report = app.batch_modify(&codes.join(" "), status)?;
            println!("modified {} SKC(s) to {status}", report.applied);
            if !report.not_found.is_empty() {
                println!("not found: {}", report.not_found.join(" "));
            }
            report_snapshot(&mut app);
        }
        "delete" => {
            let [_, codes @ ..] = command else {
                return usage("delete <codes...>");
            };
            let report = app.batch_delete(&codes.join(" "))?;
            println!("deleted {} SKC(s)", report.applied);
            if !report.not_found.is_empty() {
                println!("not found: {}", report.not_found.join(" "));
            }
            report_snapshot(&mut app);
        }
        "sort" => {
            app.auto_sort();
            println!("SKCs reordered by status");
            report_snapshot(&mut app);
        }
        "image" => {
            let [_, product, path] = command else {
                return usage("image <product> <path>");
            };
            app.assign_image(product, path)?;
            println!("image attached to {product}");
            report_snapshot(&mut app);
        }
        "import" => {
            let [_, file] = command else {
                return usage("import <file.xlsx>");
            };
            let imported = app.import_workbook(file.as_ref())?;
            println!("imported {imported} record(s)");
            report_snapshot(&mut app);
        }
        "latest" => match app.latest_snapshot() {
            Some(path) => println!("{}", path.display()),
            None => println!("no snapshots yet"),
        },
        "new-project" => {
            let name = app.create_project(command.get(1).map(String::as_str))?;
            println!("created project {name}");
        }
        "import-project" => {
            let [_, folder] = command else {
                return usage("import-project <folder>");
            };
            let name = app.import_project(folder.as_ref())?;
            println!("imported as project {name}");
        }
        "export-project" => {
            let [_, target] = command else {
                return usage("export-project <target-dir>");
            };
            let dst = app.export_project(target.as_ref())?;
            println!("exported to {}", dst.display());
        }
        other => {
            eprintln!("unknown command: {other}");
            eprint!("{USAGE}");
        }
    }
    Ok(())
}

fn usage(line: &str) -> Result<(), Error> {
    eprintln!("usage: skc-manager {line}");
    Ok(())
}

/// Wait for the snapshot the mutation just kicked off, echoing progress as
/// it arrives.
fn report_snapshot(app: &mut SkcApp) {
    match app.finish_export_with(|percent| println!("saving snapshot... {percent}%")) {
        Some(ExportEvent::Finished(path)) => println!("snapshot saved: {}", path.display()),
        Some(ExportEvent::Cancelled) => println!("snapshot cancelled"),
        Some(ExportEvent::Failed(msg)) => eprintln!("snapshot failed: {msg}"),
        Some(ExportEvent::Progress(_)) | None => {}
    }
}
