// Copyright (C) 2025 Preview Platform Team (platform@drape.dev)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Project Detector (C6): a pure function of (files, `package.json`) that
//! classifies a project and produces its install/start commands (§4.6).

use crate::model::{DetectedProject, Project, ProjectType};
use regex::Regex;
use serde_json::Value;

fn has_file_named(project: &Project, name: &str) -> bool {
    project
        .files
        .iter()
        .any(|f| f.path.rsplit('/').next() == Some(name))
}

fn has_file_with_extension(project: &Project, ext: &str) -> bool {
    project.files.iter().any(|f| f.path.ends_with(ext))
}

fn has_file_matching_glob_stem(project: &Project, stem: &str) -> bool {
    project
        .files
        .iter()
        .any(|f| f.path.rsplit('/').next().map(|n| n.starts_with(stem)).unwrap_or(false))
}

fn package_json_value(project: &Project) -> Option<Value> {
    let file = project.package_json()?;
    serde_json::from_slice(&file.content).ok()
}

fn depends_on(pkg: &Value, name: &str) -> bool {
    for key in ["dependencies", "devDependencies"] {
        if pkg.get(key).and_then(|d| d.get(name)).is_some() {
            return true;
        }
    }
    false
}

fn dependency_version(pkg: &Value, name: &str) -> Option<String> {
    for key in ["dependencies", "devDependencies"] {
        if let Some(v) = pkg.get(key).and_then(|d| d.get(name)).and_then(|v| v.as_str()) {
            return Some(v.to_string());
        }
    }
    None
}

fn has_script(pkg: &Value, name: &str) -> bool {
    pkg.get("scripts").and_then(|s| s.get(name)).is_some()
}

/// Whether `version` (a loose semver string, possibly prefixed `^`/`~`)
/// falls in `[16.0.0, 16.1.x]`, the Next.js range the detector warns about.
fn next_version_needs_downgrade_warning(version: &str) -> bool {
    let re = Regex::new(r"(\d+)\.(\d+)\.(\d+)").unwrap();
    let Some(caps) = re.captures(version) else {
        return false;
    };
    let major: u32 = caps[1].parse().unwrap_or(0);
    let minor: u32 = caps[2].parse().unwrap_or(0);
    major == 16 && (minor == 0 || minor == 1)
}

/// Classifies `project` per the ordered rule list in §4.6. Pure function of
/// (files, `package.json`): equal inputs yield equal outputs.
pub fn detect(project: &Project) -> Option<DetectedProject> {
    let pkg = package_json_value(project);

    if let Some(ref pkg) = pkg {
        if depends_on(pkg, "expo") || depends_on(pkg, "react-native") || has_file_named(project, "app.json") {
            return Some(DetectedProject {
                project_type: ProjectType::ReactNative,
                default_port: 8081,
                install_command: vec![vec!["npm".into(), "install".into()]],
                start_command: vec![
                    "npx".into(), "expo".into(), "start".into(), "--host".into(), "0.0.0.0".into(),
                    "--port".into(), "8081".into(),
                ],
                notes: vec![],
            });
        }

        if let Some(version) = dependency_version(pkg, "next") {
            let mut notes = Vec::new();
            if next_version_needs_downgrade_warning(&version) {
                notes.push(
                    "next@16.0.0-16.1.x has known dev-server issues; recommend downgrading to 15.3.0".to_string(),
                );
            }
            return Some(DetectedProject {
                project_type: ProjectType::NextJs,
                default_port: 3000,
                install_command: vec![vec!["pnpm".into(), "install".into()]],
                start_command: vec![
                    "pnpm".into(), "run".into(), "dev".into(), "--".into(),
                    "-H".into(), "0.0.0.0".into(), "-p".into(), "3000".into(),
                ],
                notes,
            });
        }

        if depends_on(pkg, "react") && has_script(pkg, "start") {
            return Some(DetectedProject {
                project_type: ProjectType::CreateReactApp,
                default_port: 8080,
                install_command: vec![vec!["npm".into(), "install".into()]],
                start_command: vec!["env".into(), "PORT=8080".into(), "npm".into(), "start".into()],
                notes: vec![],
            });
        }

        if depends_on(pkg, "vue") {
            return Some(DetectedProject {
                project_type: ProjectType::Vue,
                default_port: 8080,
                install_command: vec![vec!["npm".into(), "install".into()]],
                start_command: vec![
                    "npm".into(), "run".into(), "serve".into(), "--".into(),
                    "--host".into(), "0.0.0.0".into(), "--port".into(), "8080".into(),
                ],
                notes: vec![],
            });
        }

        if has_file_matching_glob_stem(project, "vite.config") || depends_on(pkg, "vite") {
            return Some(DetectedProject {
                project_type: ProjectType::Vite,
                default_port: 3000,
                install_command: vec![vec!["pnpm".into(), "install".into()]],
                start_command: vec![
                    "pnpm".into(), "run".into(), "dev".into(), "--".into(),
                    "--host".into(), "0.0.0.0".into(), "--port".into(), "3000".into(),
                ],
                notes: vec!["allowedHosts patch applied to vite.config for provider wildcard hostname".into()],
            });
        }
    }

    // Rules below this point don't require a parsed package.json.
    if has_file_with_extension(project, ".csproj") || has_file_with_extension(project, ".sln") {
        return Some(DetectedProject {
            project_type: ProjectType::DotNet,
            default_port: 5000,
            install_command: vec![vec!["dotnet".into(), "restore".into()]],
            start_command: vec!["dotnet".into(), "run".into(), "--urls".into(), "http://0.0.0.0:5000".into()],
            notes: vec![],
        });
    }

    if has_file_named(project, "manage.py") && has_file_named(project, "wsgi.py") {
        return Some(DetectedProject {
            project_type: ProjectType::Django,
            default_port: 8000,
            install_command: vec![vec!["pip".into(), "install".into(), "-r".into(), "requirements.txt".into()]],
            start_command: vec![
                "python3".into(), "manage.py".into(), "runserver".into(), "0.0.0.0:8000".into(),
            ],
            notes: vec![],
        });
    }

    if has_file_named(project, "app.py") || has_file_named(project, "main.py") {
        let entry = if has_file_named(project, "app.py") { "app.py" } else { "main.py" };
        return Some(DetectedProject {
            project_type: ProjectType::PythonGeneric,
            default_port: 8000,
            install_command: vec![vec!["pip".into(), "install".into(), "-r".into(), "requirements.txt".into()]],
            start_command: vec!["python3".into(), entry.into()],
            notes: vec![],
        });
    }

    if has_file_named(project, "pom.xml") || has_file_named(project, "build.gradle") {
        return Some(DetectedProject {
            project_type: ProjectType::SpringGradle,
            default_port: 8080,
            install_command: vec![vec!["./gradlew".into(), "build".into(), "-x".into(), "test".into()]],
            start_command: vec!["./gradlew".into(), "bootRun".into(), "--args=--server.address=0.0.0.0".into()],
            notes: vec![],
        });
    }

    if has_file_named(project, "go.mod") {
        return Some(DetectedProject {
            project_type: ProjectType::Go,
            default_port: 8080,
            install_command: vec![vec!["go".into(), "build".into(), "./...".into()]],
            start_command: vec!["go".into(), "run".into(), ".".into(), "-addr".into(), "0.0.0.0:8080".into()],
            notes: vec![],
        });
    }

    if has_file_named(project, "artisan") {
        return Some(DetectedProject {
            project_type: ProjectType::Laravel,
            default_port: 8000,
            install_command: vec![vec!["composer".into(), "install".into()]],
            start_command: vec!["php".into(), "artisan".into(), "serve".into(), "--host=0.0.0.0".into(), "--port=8000".into()],
            notes: vec![],
        });
    }

    if has_file_named(project, "composer.json") {
        return Some(DetectedProject {
            project_type: ProjectType::PhpGeneric,
            default_port: 8000,
            install_command: vec![vec!["composer".into(), "install".into()]],
            start_command: vec!["php".into(), "-S".into(), "0.0.0.0:8000".into()],
            notes: vec![],
        });
    }

    if has_file_named(project, "Gemfile") && has_file_named(project, "config.ru") {
        return Some(DetectedProject {
            project_type: ProjectType::Rails,
            default_port: 3000,
            install_command: vec![vec!["bundle".into(), "install".into()]],
            start_command: vec!["bundle".into(), "exec".into(), "rails".into(), "server".into(), "-b".into(), "0.0.0.0".into(), "-p".into(), "3000".into()],
            notes: vec![],
        });
    }

    if has_file_with_extension(project, ".rb") {
        return Some(DetectedProject {
            project_type: ProjectType::Ruby,
            default_port: 4567,
            install_command: vec![vec!["bundle".into(), "install".into()]],
            start_command: vec!["ruby".into(), "app.rb".into(), "-o".into(), "0.0.0.0".into(), "-p".into(), "4567".into()],
            notes: vec![],
        });
    }

    if has_file_named(project, "index.html") && pkg.is_none() {
        return Some(DetectedProject {
            project_type: ProjectType::StaticHtml,
            default_port: 8000,
            install_command: vec![],
            start_command: vec!["python3".into(), "-m".into(), "http.server".into(), "8000".into(), "--bind".into(), "0.0.0.0".into()],
            notes: vec![],
        });
    }

    None
}

/// Adds the provider's wildcard hostname to a Vite config's
/// `server.allowedHosts` list, as required by §4.6 for HMR-capable dev
/// servers. Best-effort string patch; a config without a recognisable
/// `defineConfig({...})` body is returned unchanged.
pub fn patch_vite_allowed_hosts(config_src: &str, hostname: &str) -> String {
    if config_src.contains("allowedHosts") {
        return config_src.to_string();
    }
    let needle = "defineConfig({";
    if let Some(pos) = config_src.find(needle) {
        let insert_at = pos + needle.len();
        let patch = format!("\n  server: {{ allowedHosts: [\"{hostname}\"] }},");
        let mut patched = String::with_capacity(config_src.len() + patch.len());
        patched.push_str(&config_src[..insert_at]);
        patched.push_str(&patch);
        patched.push_str(&config_src[insert_at..]);
        patched
    } else {
        config_src.to_string()
    }
}
