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

#[cfg(test)]
mod tests {
    use super::*;
    use preview_core::detector::{detect, patch_vite_allowed_hosts};
    use preview_core::model::{Project, ProjectFile, ProjectType};

    fn project_with_package_json(json: &str, extra: Vec<ProjectFile>) -> Project {
        let mut files = vec![ProjectFile {
            path: "package.json".into(),
            content: json.as_bytes().to_vec(),
            mode: 0o644,
        }];
        files.extend(extra);
        Project { project_id: "p".into(), files }
    }

    #[test]
    fn detects_vite_react_project() {
        let project = project_with_package_json(
            r#"{"dependencies": {"vite": "^5.0.0", "react": "^18.0.0"}}"#,
            vec![],
        );
        let detected = detect(&project).unwrap();
        assert_eq!(detected.project_type, ProjectType::Vite);
        assert_eq!(detected.default_port, 3000);
    }

    #[test]
    fn detects_nextjs_and_warns_on_problem_range() {
        let project = project_with_package_json(r#"{"dependencies": {"next": "16.1.1"}}"#, vec![]);
        let detected = detect(&project).unwrap();
        assert_eq!(detected.project_type, ProjectType::NextJs);
        assert!(detected.notes.iter().any(|n| n.contains("15.3.0")));
    }

    #[test]
    fn nextjs_14_gets_no_warning() {
        let project = project_with_package_json(r#"{"dependencies": {"next": "14.2.0"}}"#, vec![]);
        let detected = detect(&project).unwrap();
        assert!(detected.notes.is_empty());
    }

    #[test]
    fn detects_django_requires_both_manage_and_wsgi() {
        let project = Project {
            project_id: "p".into(),
            files: vec![
                ProjectFile { path: "manage.py".into(), content: vec![], mode: 0o644 },
                ProjectFile { path: "app/wsgi.py".into(), content: vec![], mode: 0o644 },
            ],
        };
        let detected = detect(&project).unwrap();
        assert_eq!(detected.project_type, ProjectType::Django);
    }

    #[test]
    fn empty_project_is_unsupported() {
        let project = Project { project_id: "p".into(), files: vec![] };
        assert!(detect(&project).is_none());
    }

    #[test]
    fn static_html_requires_absence_of_package_json() {
        let project = Project {
            project_id: "p".into(),
            files: vec![ProjectFile { path: "index.html".into(), content: vec![], mode: 0o644 }],
        };
        let detected = detect(&project).unwrap();
        assert_eq!(detected.project_type, ProjectType::StaticHtml);
    }

    #[test]
    fn vite_config_gets_allowed_hosts_patch() {
        let src = "export default defineConfig({\n  plugins: [],\n});\n";
        let patched = patch_vite_allowed_hosts(src, "preview.drape.dev");
        assert!(patched.contains("allowedHosts"));
        assert!(patched.contains("preview.drape.dev"));
    }

    #[test]
    fn detector_is_a_pure_function() {
        let project = project_with_package_json(r#"{"dependencies": {"vue": "^3.0.0"}}"#, vec![]);
        assert_eq!(detect(&project), detect(&project));
    }
}
