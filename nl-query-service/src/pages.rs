//! 浏览器端 HTML 页面

use std::fmt::Write as _;

use common::errors::AppError;
use common::models::{BackendKind, QueryAnswer};
use common::utils::escape_markup;

const FORM_HEAD: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>SQL Query Interface</title>
</head>
<body>
    <h1>Enter Database Details and Query</h1>
    <form action="/query_sql" method="post">
        <label for="db_type">Database Type:</label><br>
        <select id="db_type" name="db_type">
"#;

const FORM_TAIL: &str = r#"        </select><br><br>
        <label for="db_location">Database Location/Connection String:</label><br>
        <input type="text" id="db_location" name="db_location"><br><br>
        <div id="sqlserver_credentials" style="display:none;">
            <label for="db_username">Username:</label><br>
            <input type="text" id="db_username" name="db_username"><br><br>
            <label for="db_password">Password:</label><br>
            <input type="password" id="db_password" name="db_password"><br><br>
        </div>
        <div id="databricks_credentials" style="display:none;">
            <label for="databricks_host">Databricks Host:</label><br>
            <input type="text" id="databricks_host" name="databricks_host"><br><br>
            <label for="databricks_token">Databricks Token:</label><br>
            <input type="password" id="databricks_token" name="databricks_token"><br><br>
        </div>
        <div id="salesforce_credentials" style="display:none;">
            <label for="sf_username">Salesforce Username:</label><br>
            <input type="text" id="sf_username" name="sf_username"><br><br>
            <label for="sf_password">Salesforce Password:</label><br>
            <input type="password" id="sf_password" name="sf_password"><br><br>
            <label for="sf_token">Salesforce Security Token:</label><br>
            <input type="password" id="sf_token" name="sf_token"><br><br>
        </div>
        <label for="query">Query:</label><br>
        <input type="text" id="query" name="query"><br><br>
        <input type="submit" value="Submit">
    </form>
    <script>
        function showCredentials(dbType) {
            ['sqlserver', 'databricks', 'salesforce'].forEach(function (kind) {
                document.getElementById(kind + '_credentials').style.display =
                    dbType == kind ? 'block' : 'none';
            });
        }
        var selector = document.getElementById('db_type');
        selector.addEventListener('change', function () { showCredentials(this.value); });
        showCredentials(selector.value);
    </script>
</body>
</html>
"#;

/// 输入页面，列出可用的数据库类型
pub fn input_form(backends: &[BackendKind]) -> String {
    let mut page = String::from(FORM_HEAD);
    for kind in backends {
        let _ = writeln!(
            page,
            r#"            <option value="{}">{}</option>"#,
            kind.as_str(),
            kind.label()
        );
    }
    page.push_str(FORM_TAIL);
    page
}

/// 结果页面：问题、生成的查询与回答
pub fn answer_page(answer: &QueryAnswer) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>SQL Query Result</title>
</head>
<body>
    <h1>Query Result</h1>
    <p>Question: {}</p>
    <p>Generated SQL query: <code>{}</code></p>
    <p>Result: {}</p>
    <a href="/">Go Back</a>
</body>
</html>
"#,
        escape_markup(&answer.question),
        escape_markup(&answer.generated_sql),
        escape_markup(&answer.answer)
    )
}

/// 错误页面，展示错误码与原始错误信息
pub fn error_page(error: &AppError) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>SQL Query Error</title>
</head>
<body>
    <h1>Query Failed</h1>
    <p>Error ({}): {}</p>
    <a href="/">Go Back</a>
</body>
</html>
"#,
        error.code(),
        escape_markup(&error.to_string())
    )
}
