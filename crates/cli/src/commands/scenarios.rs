#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
}

pub const DEFAULT_SCENARIO: &str = "ec2-t3-micro";

pub const SCENARIOS: &[Scenario] = &[
    Scenario { name: DEFAULT_SCENARIO, description: "One EC2 t3.micro instance running 24/7" },
    Scenario {
        name: "quick-ec2",
        description: "[quick] One EC2 t3.micro instance running 24/7",
    },
    Scenario {
        name: "serverless-api",
        description: "A serverless REST API: API Gateway with 1 million requests per month, \
                      3 Lambda functions (512 MB, 200 ms average duration), and a DynamoDB \
                      on-demand table storing 5 GB",
    },
    Scenario {
        name: "static-site",
        description: "Static website on S3 with 10 GB of storage served through CloudFront \
                      with 100 GB of monthly data transfer",
    },
    Scenario {
        name: "web-app",
        description: "Web application with 2 EC2 m5.large instances behind an Application \
                      Load Balancer and a Multi-AZ RDS PostgreSQL db.t3.medium with 100 GB gp3 storage",
    },
];

pub fn find(name: &str) -> Option<&'static Scenario> {
    let name = name.trim();
    SCENARIOS.iter().find(|scenario| scenario.name.eq_ignore_ascii_case(name))
}

pub fn default_scenario() -> &'static Scenario {
    &SCENARIOS[0]
}

pub fn run() -> String {
    let mut lines = vec!["built-in scenarios:".to_string()];
    for scenario in SCENARIOS {
        let marker = if scenario.name == DEFAULT_SCENARIO { " (default)" } else { "" };
        lines.push(format!("- {}{marker}: {}", scenario.name, scenario.description));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{default_scenario, find, run, DEFAULT_SCENARIO};

    #[test]
    fn default_is_the_single_ec2_instance() {
        assert_eq!(default_scenario().name, DEFAULT_SCENARIO);
        assert_eq!(default_scenario().description, "One EC2 t3.micro instance running 24/7");
    }

    #[test]
    fn lookup_ignores_case_and_whitespace() {
        assert_eq!(find(" Serverless-API ").map(|scenario| scenario.name), Some("serverless-api"));
        assert!(find("mainframe").is_none());
    }

    #[test]
    fn listing_marks_default() {
        assert!(run().contains("- ec2-t3-micro (default): One EC2 t3.micro instance running 24/7"));
    }
}
